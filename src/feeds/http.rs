//! HTTP(S) feed fetcher.

use super::FeedFetcher;
use crate::config::{FeedDescriptor, IngestionConfig};
use crate::error::FetchError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tracing::debug;

/// Fetches feeds over HTTP with a shared client.
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    /// Create a fetcher honouring the configured timeout, user agent and
    /// body limit.
    pub fn new(config: &IngestionConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, feed: &FeedDescriptor) -> Result<Bytes, FetchError> {
        // The endpoint may carry an expanded API key; only the name is logged.
        debug!(feed = %feed.name, "Fetching feed");

        let mut response = self
            .client
            .get(&feed.endpoint)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&feed.name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                feed: feed.name.clone(),
                status,
            });
        }

        let too_large = || FetchError::BodyTooLarge {
            feed: feed.name.clone(),
            limit: self.max_body_bytes,
        };

        if let Some(length) = response.content_length() {
            if length > self.max_body_bytes as u64 {
                return Err(too_large());
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(&feed.name, e))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(FetchError::EmptyBody {
                feed: feed.name.clone(),
            });
        }

        debug!(feed = %feed.name, bytes = body.len(), "Feed fetched");
        Ok(body.freeze())
    }
}
