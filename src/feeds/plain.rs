//! Newline-delimited text feeds.

use crate::error::ParseError;

/// Split a text body into one candidate per line.
///
/// Lines are returned as-is, including blanks, comments and trailing `\r`.
pub fn parse_lines(body: &[u8]) -> Result<Vec<String>, ParseError> {
    let text = std::str::from_utf8(body)?;
    Ok(text.split('\n').map(str::to_string).collect())
}
