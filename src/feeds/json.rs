//! JSON feeds whose entries carry nested IP lists.
//!
//! Two document shapes are accepted:
//!
//! ```json
//! [ { "indicators": { "ipv4": ["1.2.3.4", "5.6.7.8"] } }, ... ]
//! { "campaign-a": { "indicators": { "ipv4": ["1.2.3.4"] } }, ... }
//! ```
//!
//! With `ip_field: "indicators.ipv4"` both yield every listed address.

use crate::error::ParseError;
use serde_json::Value;

/// Flatten the IP lists found at `ip_field` in every entry of the document.
///
/// Entries without the field are skipped, as are non-string list items. A
/// field holding a single string instead of a list contributes that string.
pub fn parse_nested_lists(body: &[u8], ip_field: &str) -> Result<Vec<String>, ParseError> {
    let document: Value = serde_json::from_slice(body)?;

    let entries: Vec<&Value> = match &document {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        other => {
            return Err(ParseError::UnexpectedShape(format!(
                "expected array or object at top level, got {}",
                type_name(other)
            )))
        }
    };

    let path: Vec<&str> = ip_field.split('.').collect();
    let mut candidates = Vec::new();

    for entry in entries {
        match descend(entry, &path) {
            Some(Value::Array(ips)) => {
                candidates.extend(ips.iter().filter_map(Value::as_str).map(str::to_string));
            }
            Some(Value::String(ip)) => candidates.push(ip.clone()),
            _ => {}
        }
    }

    Ok(candidates)
}

fn descend<'a>(mut value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    for segment in path {
        value = value.get(segment)?;
    }
    Some(value)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
