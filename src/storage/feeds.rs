use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{feed_from_row, to_unix, FeedRow};
use crate::model::Feed;
use crate::scheduler::FeedStore;

const FEED_COLUMNS: &str = "f.id, f.url, f.last_fetch, f.last_checked, f.last_had_new_content, f.average_update_interval";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Adds a feed, or returns the existing id when the URL is known.
    ///
    /// Re-adding a per-user feed as global promotes it; the reverse never
    /// demotes a global feed.
    pub async fn insert_feed(&self, url: &str, is_global: bool) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
                INSERT INTO feeds (url, is_global) VALUES (?, ?)
                ON CONFLICT(url) DO UPDATE SET is_global = MAX(feeds.is_global, excluded.is_global)
                RETURNING id
            "#,
        )
        .bind(url)
        .bind(is_global)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds f WHERE f.id = ?"))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(feed_from_row))
    }

    // ========================================================================
    // Users and Subscriptions
    // ========================================================================

    /// Creates a user, or returns the existing id for `name`.
    pub async fn create_user(&self, name: &str) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
                INSERT INTO users (name, created_at) VALUES (?, ?)
                ON CONFLICT(name) DO UPDATE SET name = excluded.name
                RETURNING id
            "#,
        )
        .bind(name)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Subscribes a user to a feed. Subscribing twice is a no-op.
    pub async fn subscribe(&self, user_id: i64, feed_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO subscriptions (user_id, feed_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, user_id: i64, feed_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FeedStore for Database {
    async fn list_global_feeds(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f WHERE f.is_global = 1 ORDER BY f.id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    async fn list_all_user_feeds(&self) -> Result<Vec<Feed>> {
        // A feed with several subscribers appears once
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            r#"
                SELECT {FEED_COLUMNS} FROM feeds f
                WHERE EXISTS (SELECT 1 FROM subscriptions s WHERE s.feed_id = f.id)
                ORDER BY f.id
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    async fn record_fetch_attempt(&self, feed_id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE feeds SET last_fetch = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_feed_tracking(&self, feed: &Feed) -> Result<()> {
        sqlx::query(
            r#"
                UPDATE feeds
                SET last_checked = ?, last_had_new_content = ?, average_update_interval = ?
                WHERE id = ?
            "#,
        )
        .bind(to_unix(feed.last_checked))
        .bind(to_unix(feed.last_had_new_content))
        .bind(feed.average_update_interval)
        .bind(feed.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
