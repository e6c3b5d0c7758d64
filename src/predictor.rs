//! Adaptive "is this feed due" heuristic.
//!
//! Feeds with a learned publishing cadence are checked at half that cadence.
//! Feeds without one fall back to dormancy tiers keyed on how recently they
//! last produced new content. Everything here is pure; callers pass `now`.

use chrono::{DateTime, Duration, Utc};

use crate::model::Feed;

/// Weight of the previous estimate when blending in a new observed gap.
pub const INTERVAL_BLEND_OLD: f64 = 0.7;
/// Weight of the newly observed gap.
pub const INTERVAL_BLEND_NEW: f64 = 0.3;

/// Feeds with new content within this window use the active tier.
pub const ACTIVE_WINDOW_DAYS: i64 = 7;
/// Feeds with new content within this window use the moderate tier.
pub const MODERATE_WINDOW_DAYS: i64 = 30;

const ACTIVE_RECHECK_MINUTES: i64 = 30;
const MODERATE_RECHECK_MINUTES: i64 = 60;
const DORMANT_RECHECK_MINUTES: i64 = 6 * 60;

/// Returns true if `feed` should be fetched at `now`.
///
/// - never checked: always due
/// - learned interval: due once more than half of it has elapsed since the
///   last check
/// - otherwise: due once the dormancy tier's recheck interval has elapsed
pub fn should_check(feed: &Feed, now: DateTime<Utc>) -> bool {
    let Some(last_checked) = feed.last_checked else {
        return true;
    };
    let elapsed = now - last_checked;

    if feed.average_update_interval > 0 {
        // elapsed > interval / 2, kept in integer seconds
        return elapsed.num_seconds() * 2 > feed.average_update_interval;
    }

    elapsed >= fallback_interval(feed, now)
}

/// Recheck interval for feeds without a learned cadence.
pub fn fallback_interval(feed: &Feed, now: DateTime<Utc>) -> Duration {
    let minutes = match feed.last_had_new_content {
        Some(last) if now - last < Duration::days(ACTIVE_WINDOW_DAYS) => ACTIVE_RECHECK_MINUTES,
        Some(last) if now - last < Duration::days(MODERATE_WINDOW_DAYS) => {
            MODERATE_RECHECK_MINUTES
        }
        _ => DORMANT_RECHECK_MINUTES,
    };
    Duration::minutes(minutes)
}

/// Records the outcome of a fetch attempt on the feed's timing fields.
///
/// `last_checked` always moves to `now`. The learned interval and
/// `last_had_new_content` only change when new content was found: the first
/// content event just records its time, later ones blend the observed gap
/// into the running average (`0.7 * old + 0.3 * gap`).
pub fn update_tracking(feed: &mut Feed, had_new_content: bool, now: DateTime<Utc>) {
    feed.last_checked = Some(now);
    if !had_new_content {
        return;
    }

    if let Some(previous) = feed.last_had_new_content {
        let gap = (now - previous).num_seconds().max(0);
        feed.average_update_interval = blend_interval(feed.average_update_interval, gap);
    }
    feed.last_had_new_content = Some(now);
}

/// Blends a new gap into the running estimate. An unknown (`0`) estimate is
/// replaced outright.
pub fn blend_interval(old: i64, observed: i64) -> i64 {
    if old <= 0 {
        return observed;
    }
    (INTERVAL_BLEND_OLD * old as f64 + INTERVAL_BLEND_NEW * observed as f64).round() as i64
}
