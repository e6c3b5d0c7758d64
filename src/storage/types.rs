use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::Feed;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with operator-facing messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("The database is locked by another process. Stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classifies a sqlx error, singling out lock contention
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed scheduling queries:
/// id, url, last_fetch, last_checked, last_had_new_content, average_update_interval
pub(crate) type FeedRow = (i64, String, Option<i64>, Option<i64>, Option<i64>, i64);

pub(crate) fn feed_from_row(row: FeedRow) -> Feed {
    let (id, url, last_fetch, last_checked, last_had_new_content, average_update_interval) = row;
    Feed {
        id,
        url,
        last_fetch: last_fetch.and_then(from_unix),
        last_checked: last_checked.and_then(from_unix),
        last_had_new_content: last_had_new_content.and_then(from_unix),
        average_update_interval,
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

pub(crate) fn to_unix(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|t| t.timestamp())
}
