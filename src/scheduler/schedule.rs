use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::config::SchedulerConfig;
use crate::model::Feed;

const BASE_PRIORITY: i32 = 50;
const STALE_DAY_BONUS: i32 = 30;
const STALE_SIX_HOURS_BONUS: i32 = 15;
const STALE_TWO_HOURS_BONUS: i32 = 5;
const RECENTLY_CHECKED_PENALTY: i32 = 20;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// One feed's slot in a cycle's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFeed {
    pub feed: Feed,
    /// Offset from the start of the cycle
    pub delay: Duration,
    pub next_update: DateTime<Utc>,
    /// Tie-break only: higher runs first among equal `next_update`
    pub priority: i32,
}

/// Union of the global and per-user feed lists, de-duplicated by URL.
///
/// When a URL appears more than once the later entry replaces the earlier
/// one in place, so the first occurrence fixes the position.
pub fn merge_feeds(global: Vec<Feed>, user: Vec<Feed>) -> Vec<Feed> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Feed> = Vec::with_capacity(global.len() + user.len());

    for feed in global.into_iter().chain(user) {
        match index.get(&feed.url) {
            Some(&pos) => merged[pos] = feed,
            None => {
                index.insert(feed.url.clone(), merged.len());
                merged.push(feed);
            }
        }
    }

    merged
}

/// Deterministic per-feed offset into the update window.
///
/// `hash(feed id) mod update_window`, plus a top-up so a feed fetched less
/// than `min_interval` ago is not hit again before that interval passes.
pub fn stagger_delay(feed: &Feed, now: DateTime<Utc>, config: &SchedulerConfig) -> Duration {
    let window_ms = u64::try_from(config.update_window.as_millis())
        .unwrap_or(u64::MAX)
        .max(1);
    let offset = Duration::from_millis(feed_hash(feed.id) % window_ms);
    offset + min_interval_top_up(feed, now, config.min_interval)
}

fn min_interval_top_up(feed: &Feed, now: DateTime<Utc>, min_interval: Duration) -> Duration {
    let Some(last_fetch) = feed.last_fetch else {
        return Duration::ZERO;
    };
    // A fetch stamped in the future counts as just now
    let since = (now - last_fetch).to_std().unwrap_or(Duration::ZERO);
    min_interval.saturating_sub(since)
}

fn feed_hash(feed_id: i64) -> u64 {
    let digest = Sha256::digest(feed_id.to_le_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Staleness score used to order feeds that share a `next_update`.
///
/// Base 50; +30 when unchecked for over a day (or never checked), +15 over
/// six hours, +5 over two hours; -20 when checked within `min_interval`.
pub fn priority(feed: &Feed, now: DateTime<Utc>, min_interval: Duration) -> i32 {
    let Some(last_checked) = feed.last_checked else {
        return BASE_PRIORITY + STALE_DAY_BONUS;
    };
    let since = (now - last_checked).to_std().unwrap_or(Duration::ZERO);

    let mut score = BASE_PRIORITY;
    if since > 24 * HOUR {
        score += STALE_DAY_BONUS;
    } else if since > 6 * HOUR {
        score += STALE_SIX_HOURS_BONUS;
    } else if since > 2 * HOUR {
        score += STALE_TWO_HOURS_BONUS;
    }
    if since < min_interval {
        score -= RECENTLY_CHECKED_PENALTY;
    }
    score
}

/// Builds one cycle's schedule, sorted by `next_update` ascending and then
/// by priority descending.
pub fn build_schedule(
    feeds: Vec<Feed>,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Vec<ScheduledFeed> {
    let mut schedule: Vec<ScheduledFeed> = feeds
        .into_iter()
        .map(|feed| {
            let delay = stagger_delay(&feed, now, config);
            let offset = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            let priority = priority(&feed, now, config.min_interval);
            ScheduledFeed {
                feed,
                delay,
                next_update: now + offset,
                priority,
            }
        })
        .collect();

    schedule.sort_by(|a, b| {
        a.next_update
            .cmp(&b.next_update)
            .then_with(|| b.priority.cmp(&a.priority))
    });
    schedule
}
