//! Threat intelligence feed sources.
//!
//! Fetching and parsing are kept apart from the store: a feed source only
//! turns an endpoint into candidate strings, and the scheduler decides what
//! to do with them.

pub mod http;
pub mod json;
pub mod plain;

pub use http::HttpFetcher;

use crate::config::{FeedDescriptor, FeedFormat};
use crate::error::{FetchError, ParseError};
use async_trait::async_trait;
use bytes::Bytes;

/// Retrieves the raw body of a feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the current body of `feed`.
    ///
    /// Must give up after a bounded time and report every failure as a
    /// [`FetchError`] naming the feed.
    async fn fetch(&self, feed: &FeedDescriptor) -> Result<Bytes, FetchError>;
}

/// Split a feed body into candidate IP strings according to its format.
///
/// Candidates are not validated here; blank lines and junk are left for
/// [`crate::normalize::normalize`] to reject.
pub fn parse(format: &FeedFormat, body: &[u8]) -> Result<Vec<String>, ParseError> {
    match format {
        FeedFormat::Plain => plain::parse_lines(body),
        FeedFormat::Json { ip_field } => json::parse_nested_lists(body, ip_field),
    }
}
