use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::DatabaseError;
use crate::model::ParsedArticle;

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Stores articles for a feed, skipping guids already present.
    ///
    /// Returns the number of newly inserted articles. Existing rows are left
    /// untouched. Runs in one transaction, batched 50 rows per statement.
    pub async fn insert_articles(
        &self,
        feed_id: i64,
        articles: &[ParsedArticle],
    ) -> Result<usize, DatabaseError> {
        if articles.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 50;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut total_inserted: usize = 0;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO articles (feed_id, guid, title, url, published, summary, fetched_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(feed_id)
                    .push_bind(&article.guid)
                    .push_bind(&article.title)
                    .push_bind(&article.url)
                    .push_bind(article.published)
                    .push_bind(&article.summary)
                    .push_bind(now);
            });

            builder.build().execute(&mut *tx).await?;

            // changes() counts only the rows this statement inserted
            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await?;
            total_inserted += usize::try_from(changes.0).unwrap_or(0);
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    pub async fn article_count(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
