//! Domain types shared by the scheduler stack and its collaborators.

use chrono::{DateTime, Utc};

/// A polled feed and the timing fields the scheduler learns from.
///
/// `None` timestamps mean "never happened". `average_update_interval` is in
/// seconds and `0` means no cadence has been learned yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    /// Last fetch attempt, successful or not
    pub last_fetch: Option<DateTime<Utc>>,
    /// Last time the scheduler examined the feed
    pub last_checked: Option<DateTime<Utc>>,
    /// Last time a fetch produced new articles
    pub last_had_new_content: Option<DateTime<Utc>>,
    pub average_update_interval: i64,
}

impl Feed {
    /// A feed that has never been fetched or checked.
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            last_fetch: None,
            last_checked: None,
            last_had_new_content: None,
            average_update_interval: 0,
        }
    }
}

/// Represents a parsed article from a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArticle {
    pub guid: String,
    pub title: String,
    pub url: Option<String>,
    pub published: Option<i64>,
    pub summary: Option<String>,
}

/// Parsed body of one fetched feed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedContent {
    pub title: Option<String>,
    pub entries: Vec<ParsedArticle>,
}
