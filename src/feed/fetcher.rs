use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;

use crate::feed::parser::{parse_feed, ParseResult};
use crate::guard::{find_guard_error, GuardError, UrlGuard};
use crate::model::FeedContent;
use crate::scheduler::FeedFetcher;
use crate::storage::Database;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching, parsing or storing one feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL rejected by the SSRF guard, before or during the request
    #[error(transparent)]
    Guard(#[from] GuardError),
    /// Network-level error (connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Storing articles failed
    #[error("Database error: {0}")]
    Database(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Fewer bytes arrived than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Maps a reqwest failure, surfacing guard rejections raised by the
    /// hardened client's resolver or redirect policy.
    fn from_request(err: reqwest::Error) -> Self {
        if let Some(guard_err) = find_guard_error(&err) {
            return FetchError::Guard(guard_err);
        }
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        FetchError::Network(err)
    }

    pub fn guard_error(&self) -> Option<&GuardError> {
        match self {
            FetchError::Guard(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_ssrf_blocked(&self) -> bool {
        self.guard_error().is_some_and(GuardError::is_ssrf_blocked)
    }

    /// Whether the failure may clear up by the next cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Guard(e) => e.is_retryable(),
            FetchError::Network(_)
            | FetchError::Timeout
            | FetchError::Database(_)
            | FetchError::IncompleteResponse { .. } => true,
            FetchError::HttpStatus(status) => *status == 429 || *status >= 500,
            FetchError::Parse(_) | FetchError::ResponseTooLarge => false,
        }
    }
}

/// Production [`FeedFetcher`]: guarded HTTP plus SQLite persistence.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    guard: UrlGuard,
    db: Database,
}

impl HttpFetcher {
    pub fn new(guard: UrlGuard, db: Database, user_agent: &str) -> Result<Self, FetchError> {
        let client = guard.client(user_agent)?;
        Ok(Self { client, guard, db })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    /// Single attempt, no in-cycle retries. A failed feed is simply
    /// eligible again on the next cycle.
    async fn fetch(&self, url: &str) -> Result<FeedContent, FetchError> {
        let url = self.guard.validate(url).await?;

        let response = tokio::time::timeout(FETCH_TIMEOUT, self.client.get(url.clone()).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::from_request)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        let ParseResult {
            content,
            rejected_links,
        } = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

        if rejected_links > 0 {
            tracing::warn!(
                feed = %url,
                rejected = rejected_links,
                "Entry links with unsupported schemes dropped"
            );
        }

        Ok(content)
    }

    async fn persist_new_articles(
        &self,
        feed_id: i64,
        content: &FeedContent,
    ) -> Result<usize, FetchError> {
        self.db
            .insert_articles(feed_id, &content.entries)
            .await
            .map_err(|e| FetchError::Database(e.to_string()))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::from_request)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
