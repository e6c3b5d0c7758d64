//! Integration tests for the polling scheduler.
//!
//! The store and fetcher are in-memory fakes so cycles can be driven under
//! paused tokio time: sleeps until a feed's slot complete instantly while
//! the relative ordering of timers is preserved.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;

use feedwarden::feed::FetchError;
use feedwarden::guard::GuardError;
use feedwarden::model::{Feed, FeedContent, ParsedArticle};
use feedwarden::ratelimit::{DomainRateLimiter, RateLimiterConfig};
use feedwarden::scheduler::{FeedFetcher, FeedStore, Scheduler, SchedulerConfig, SchedulerError};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct MemoryStore {
    global: Vec<Feed>,
    user: Vec<Feed>,
    fail_listing: bool,
    list_calls: AtomicUsize,
    attempts: Mutex<Vec<i64>>,
    tracked: Mutex<HashMap<i64, Feed>>,
}

impl MemoryStore {
    fn with_global(feeds: Vec<Feed>) -> Self {
        Self {
            global: feeds,
            ..Self::default()
        }
    }

    fn tracked(&self, feed_id: i64) -> Option<Feed> {
        self.tracked.lock().unwrap().get(&feed_id).cloned()
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn list_global_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            anyhow::bail!("store unavailable");
        }
        Ok(self.global.clone())
    }

    async fn list_all_user_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        Ok(self.user.clone())
    }

    async fn record_fetch_attempt(&self, feed_id: i64, _at: DateTime<Utc>) -> anyhow::Result<()> {
        self.attempts.lock().unwrap().push(feed_id);
        Ok(())
    }

    async fn update_feed_tracking(&self, feed: &Feed) -> anyhow::Result<()> {
        self.tracked.lock().unwrap().insert(feed.id, feed.clone());
        Ok(())
    }
}

struct FakeFetcher {
    latency: Duration,
    failing: HashSet<String>,
    blocked: HashSet<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            failing: HashSet::new(),
            blocked: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FeedContent, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(url.to_string());

        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.blocked.contains(url) {
            return Err(FetchError::Guard(GuardError::SsrfBlocked {
                host: "internal".into(),
                ip: "10.0.0.1".parse().unwrap(),
            }));
        }
        if self.failing.contains(url) {
            return Err(FetchError::HttpStatus(503));
        }
        Ok(FeedContent {
            title: None,
            entries: vec![ParsedArticle {
                guid: format!("{url}#1"),
                title: "Entry".into(),
                url: None,
                published: None,
                summary: None,
            }],
        })
    }

    async fn persist_new_articles(
        &self,
        _feed_id: i64,
        content: &FeedContent,
    ) -> Result<usize, FetchError> {
        Ok(content.entries.len())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// A one-millisecond window puts every feed's slot at the start of the cycle.
fn burst_config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig {
        update_window: Duration::from_millis(1),
        min_interval: Duration::from_millis(1),
        max_concurrent,
        cleanup_interval: Duration::from_secs(3600),
    }
}

fn distinct_feeds(count: i64) -> Vec<Feed> {
    (1..=count)
        .map(|i| Feed::new(i, format!("https://feed{i}.example.com/rss")))
        .collect()
}

fn scheduler(
    store: Arc<MemoryStore>,
    fetcher: Arc<FakeFetcher>,
    config: SchedulerConfig,
) -> (Scheduler, Arc<DomainRateLimiter>) {
    let limiter = Arc::new(DomainRateLimiter::new(RateLimiterConfig::default()));
    let scheduler = Scheduler::new(store, fetcher, Arc::clone(&limiter), config);
    (scheduler, limiter)
}

// ============================================================================
// Cycle behavior
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_max() {
    let store = Arc::new(MemoryStore::with_global(distinct_feeds(20)));
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(500)));
    let (scheduler, _) = scheduler(store, Arc::clone(&fetcher), burst_config(3));

    let summary = scheduler.run_once().await;

    assert_eq!(summary.scheduled, 20);
    assert_eq!(summary.checked, 20);
    assert_eq!(fetcher.fetch_count(), 20);
    assert_eq!(fetcher.peak.load(Ordering::SeqCst), 3);
    assert_eq!(fetcher.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_urls_fetched_once() {
    let shared = Feed::new(1, "https://example.com/rss");
    let store = Arc::new(MemoryStore {
        global: vec![shared.clone(), Feed::new(2, "https://other.example/rss")],
        user: vec![shared],
        ..MemoryStore::default()
    });
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(store, Arc::clone(&fetcher), burst_config(10));

    let summary = scheduler.run_once().await;

    assert_eq!(summary.scheduled, 2);
    assert_eq!(fetcher.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_same_domain_is_rate_limited_within_cycle() {
    let store = Arc::new(MemoryStore::with_global(vec![
        Feed::new(1, "https://example.com/a.xml"),
        Feed::new(2, "https://www.example.com/b.xml"),
        Feed::new(3, "https://elsewhere.example/rss"),
    ]));
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, limiter) = scheduler(store, Arc::clone(&fetcher), burst_config(10));

    let summary = scheduler.run_once().await;

    assert_eq!(summary.checked, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.rate_limited, 1);
    assert_eq!(limiter.domain_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_not_due_feed_is_skipped_without_fetch() {
    let recent = Feed {
        last_checked: Some(Utc::now() - chrono::Duration::minutes(1)),
        last_had_new_content: Some(Utc::now() - chrono::Duration::days(1)),
        ..Feed::new(1, "https://example.com/rss")
    };
    let store = Arc::new(MemoryStore::with_global(vec![recent]));
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, limiter) = scheduler(Arc::clone(&store), Arc::clone(&fetcher), burst_config(10));

    let summary = scheduler.run_once().await;

    assert_eq!(summary.checked, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.rate_limited, 0);
    assert_eq!(fetcher.fetch_count(), 0);
    // The limiter is never consulted for feeds that are not due
    assert_eq!(limiter.domain_count(), 0);
    assert!(store.tracked(1).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_isolated_and_counted() {
    let store = Arc::new(MemoryStore::with_global(distinct_feeds(4)));
    let mut fetcher = FakeFetcher::new(Duration::from_millis(10));
    fetcher.failing.insert("https://feed2.example.com/rss".into());
    fetcher.blocked.insert("https://feed3.example.com/rss".into());
    let fetcher = Arc::new(fetcher);
    let (scheduler, _) = scheduler(Arc::clone(&store), Arc::clone(&fetcher), burst_config(10));

    let summary = scheduler.run_once().await;

    assert_eq!(summary.checked, 4);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.had_new_content, 2);
    // Each feed is tried exactly once per cycle
    assert_eq!(fetcher.fetch_count(), 4);

    // Failed feeds still move last_checked but learn nothing
    let failed = store.tracked(2).unwrap();
    assert!(failed.last_checked.is_some());
    assert!(failed.last_had_new_content.is_none());

    let ok = store.tracked(1).unwrap();
    assert!(ok.last_checked.is_some());
    assert!(ok.last_had_new_content.is_some());
    assert_eq!(store.attempts.lock().unwrap().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_listing_failure_yields_empty_cycle() {
    let store = Arc::new(MemoryStore {
        global: distinct_feeds(3),
        fail_listing: true,
        ..MemoryStore::default()
    });
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(store, Arc::clone(&fetcher), burst_config(10));

    let summary = scheduler.run_once().await;

    assert_eq!(summary.scheduled, 0);
    assert_eq!(fetcher.fetch_count(), 0);
    assert_eq!(scheduler.status().last_cycle, Some(summary));
}

#[tokio::test(start_paused = true)]
async fn test_staggered_feeds_wait_for_their_slot() {
    let config = SchedulerConfig {
        update_window: Duration::from_secs(600),
        ..burst_config(10)
    };
    let store = Arc::new(MemoryStore::with_global(distinct_feeds(5)));
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(store, Arc::clone(&fetcher), config);

    let started = tokio::time::Instant::now();
    let summary = scheduler.run_once().await;

    assert_eq!(summary.checked, 5);
    // At least one of five hashed offsets lands past the first second
    assert!(started.elapsed() > Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(601));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_twice_errors_and_stop_is_idempotent() {
    let store = Arc::new(MemoryStore::default());
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(store, fetcher, SchedulerConfig::default());

    assert!(!scheduler.is_running());
    scheduler.start().unwrap();
    assert!(scheduler.is_running());
    assert_eq!(scheduler.start(), Err(SchedulerError::AlreadyRunning));

    scheduler.stop();
    scheduler.stop();
    scheduler.wait_stopped().await;
    assert!(!scheduler.is_running());

    // Restartable after a stop
    scheduler.start().unwrap();
    scheduler.stop();
    scheduler.wait_stopped().await;
}

#[tokio::test(start_paused = true)]
async fn test_trigger_requires_running() {
    let store = Arc::new(MemoryStore::default());
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(Arc::clone(&store), fetcher, SchedulerConfig::default());

    assert_eq!(scheduler.trigger_now(), Err(SchedulerError::NotRunning));

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);

    scheduler.trigger_now().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 2);

    scheduler.stop();
    scheduler.wait_stopped().await;
}

#[tokio::test(start_paused = true)]
async fn test_cycles_repeat_every_window() {
    let config = SchedulerConfig {
        update_window: Duration::from_secs(60),
        ..burst_config(10)
    };
    let store = Arc::new(MemoryStore::with_global(distinct_feeds(1)));
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(Arc::clone(&store), fetcher, config);

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(150)).await;
    // Cycles at t=0, 60 and 120
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 3);

    scheduler.stop();
    scheduler.wait_stopped().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_sleeping_workers() {
    let store = Arc::new(MemoryStore::with_global(distinct_feeds(5)));
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(store, Arc::clone(&fetcher), SchedulerConfig::default());

    scheduler.start().unwrap();
    tokio::task::yield_now().await;

    let stopping = tokio::time::Instant::now();
    scheduler.stop();
    scheduler.wait_stopped().await;

    // Workers parked on multi-hour slots exit instead of running out the clock
    assert!(stopping.elapsed() < Duration::from_secs(60));
    assert_eq!(fetcher.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_huge_durations_are_capped_and_loops_keep_running() {
    let config = SchedulerConfig::from_secs(i64::MAX, i64::MAX, 0, i64::MAX);
    let mut feed = Feed::new(1, "https://feed1.example.com/rss".to_string());
    feed.last_fetch = Some(Utc::now());
    let store = Arc::new(MemoryStore::with_global(vec![feed]));
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(Arc::clone(&store), fetcher, config);

    let status = scheduler.status();
    let cap = SchedulerConfig::MAX_DURATION.as_secs();
    assert_eq!(status.update_window_secs, cap);
    assert_eq!(status.min_interval_secs, cap);
    assert_eq!(status.cleanup_interval_secs, cap);

    // The worker parks on a year-long min-interval top-up
    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
    assert!(scheduler.is_running());

    let stopping = tokio::time::Instant::now();
    scheduler.stop();
    scheduler.wait_stopped().await;
    assert!(stopping.elapsed() < Duration::from_secs(60));
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_loop_reclaims_idle_buckets() {
    let config = SchedulerConfig {
        cleanup_interval: Duration::from_secs(60),
        ..SchedulerConfig::default()
    };
    let store = Arc::new(MemoryStore::default());
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, limiter) = scheduler(store, fetcher, config);

    assert!(limiter.allow("https://a.example/rss"));
    assert!(limiter.allow("https://b.example/rss"));
    assert_eq!(limiter.domain_count(), 2);

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(scheduler.status().tracked_domains, 2);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(scheduler.status().tracked_domains, 0);

    scheduler.stop();
    scheduler.wait_stopped().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_config_and_last_cycle() {
    let store = Arc::new(MemoryStore::with_global(distinct_feeds(2)));
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(10)));
    let (scheduler, _) = scheduler(store, fetcher, burst_config(4));

    let before = scheduler.status();
    assert!(!before.is_running);
    assert_eq!(before.max_concurrent, 4);
    assert_eq!(before.cleanup_interval_secs, 3600);
    assert!(before.last_cycle.is_none());

    let summary = scheduler.run_once().await;
    let after = scheduler.status();
    assert_eq!(after.last_cycle, Some(summary));
    assert_eq!(after.tracked_domains, 2);

    let json = serde_json::to_value(&after).unwrap();
    assert_eq!(json["last_cycle"]["checked"], 2);
}
