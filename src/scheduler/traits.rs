use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::feed::FetchError;
use crate::model::{Feed, FeedContent};

/// Persistence the scheduler reads feeds from and writes tracking fields to.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Feeds polled on behalf of the whole service
    async fn list_global_feeds(&self) -> Result<Vec<Feed>>;

    /// Every feed some user is subscribed to (may overlap the global list)
    async fn list_all_user_feeds(&self) -> Result<Vec<Feed>>;

    /// Stamps `last_fetch` before the request goes out
    async fn record_fetch_attempt(&self, feed_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Writes back `last_checked`, `last_had_new_content` and
    /// `average_update_interval`
    async fn update_feed_tracking(&self, feed: &Feed) -> Result<()>;
}

/// Retrieval and article persistence for a single feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetches and parses the document at `url`.
    async fn fetch(&self, url: &str) -> Result<FeedContent, FetchError>;

    /// Stores the entries of `content`, returning how many were new.
    async fn persist_new_articles(
        &self,
        feed_id: i64,
        content: &FeedContent,
    ) -> Result<usize, FetchError>;
}
