//! Error types for feed ingestion.
//!
//! Neither error type is fatal: both are caught at the single-feed boundary
//! in the scheduler, logged, and cause that feed to be skipped for the
//! current cycle.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure to retrieve a feed body.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, connect, TLS, reset).
    #[error("feed '{feed}': HTTP error: {source}")]
    Http {
        feed: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the configured timeout.
    #[error("feed '{feed}': request timed out")]
    Timeout { feed: String },

    /// Endpoint answered with a non-2xx status.
    #[error("feed '{feed}': HTTP {status}")]
    Status { feed: String, status: StatusCode },

    /// Endpoint answered 2xx with nothing in the body.
    #[error("feed '{feed}': empty response body")]
    EmptyBody { feed: String },

    /// Body exceeded the configured size limit.
    #[error("feed '{feed}': response body exceeds {limit} bytes")]
    BodyTooLarge { feed: String, limit: usize },
}

impl FetchError {
    /// Classify a reqwest error for the given feed.
    pub fn from_reqwest(feed: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout {
                feed: feed.to_string(),
            }
        } else {
            FetchError::Http {
                feed: feed.to_string(),
                source: error,
            }
        }
    }

    /// Name of the feed that failed.
    pub fn feed(&self) -> &str {
        match self {
            FetchError::Http { feed, .. }
            | FetchError::Timeout { feed }
            | FetchError::Status { feed, .. }
            | FetchError::EmptyBody { feed }
            | FetchError::BodyTooLarge { feed, .. } => feed,
        }
    }
}

/// Malformed feed body for its declared format.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// JSON parsed, but the top level is neither an array nor an object.
    #[error("unexpected document shape: {0}")]
    UnexpectedShape(String),
}

/// Error raised while processing a single feed within a cycle.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("feed '{feed}': parse error: {source}")]
    Parse {
        feed: String,
        #[source]
        source: ParseError,
    },
}

impl FeedError {
    /// Name of the feed that failed.
    pub fn feed(&self) -> &str {
        match self {
            FeedError::Fetch(e) => e.feed(),
            FeedError::Parse { feed, .. } => feed,
        }
    }
}
