use anyhow::Result;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use crate::model::{FeedContent, ParsedArticle};

/// Parsed feed plus the number of entry links that were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseResult {
    pub content: FeedContent,
    /// Entries whose link was not http(s) and was discarded
    pub rejected_links: usize,
}

/// Parses an RSS, Atom or JSON Feed document.
///
/// Entry links with any scheme other than http/https are dropped (the entry
/// itself is kept). Entries without an id get a stable SHA-256 guid derived
/// from link, title and publication time.
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult> {
    let feed = parser::parse(bytes)?;
    let mut rejected_links = 0;

    let entries: Vec<ParsedArticle> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let url = match entry.links.first().map(|l| l.href.trim().to_string()) {
                Some(href) if is_web_link(&href) => Some(href),
                Some(_) => {
                    rejected_links += 1;
                    None
                }
                None => None,
            };
            let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let guid = generate_guid(existing_id, url.as_deref(), &title, published);

            ParsedArticle {
                guid,
                title,
                url,
                published,
                summary,
            }
        })
        .collect();

    Ok(ParseResult {
        content: FeedContent {
            title: feed.title.map(|t| t.content),
            entries,
        },
        rejected_links,
    })
}

fn is_web_link(href: &str) -> bool {
    url::Url::parse(href)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
