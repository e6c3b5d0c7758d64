use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters shared by all workers of one cycle.
#[derive(Debug, Default)]
pub struct CycleStats {
    checked: AtomicUsize,
    skipped: AtomicUsize,
    rate_limited: AtomicUsize,
    failed: AtomicUsize,
    had_new_content: AtomicUsize,
}

impl CycleStats {
    pub fn record_checked(&self) {
        self.checked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_due(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Rate-limited feeds count as skipped as well.
    pub fn record_rate_limited(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_new_content(&self) {
        self.had_new_content.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summarize(
        &self,
        scheduled: usize,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> CycleSummary {
        CycleSummary {
            started_at,
            finished_at,
            scheduled,
            checked: self.checked.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            had_new_content: self.had_new_content.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a finished cycle, kept for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Feeds placed on the schedule
    pub scheduled: usize,
    /// Feeds actually fetched (successfully or not)
    pub checked: usize,
    /// Feeds not fetched because they were not due or were rate limited
    pub skipped: usize,
    pub rate_limited: usize,
    pub failed: usize,
    pub had_new_content: usize,
}
