//! Staggered, rate-limited polling of every known feed.
//!
//! A cycle runs at start-up, every `update_window`, and on demand via
//! [`Scheduler::trigger_now`]. Each cycle:
//!
//! 1. loads the union of global and subscribed feeds from the [`FeedStore`]
//! 2. spreads them over the window with a per-feed hash offset
//!    ([`build_schedule`])
//! 3. spawns one worker per feed that sleeps until its slot, takes a
//!    concurrency permit, and then checks the feed: predictor, then domain
//!    rate limiter, then fetch through the [`FeedFetcher`]
//!
//! A second loop sweeps idle rate limiter buckets every `cleanup_interval`.
//! Both loops, and every sleeping or queued worker, stop when
//! [`Scheduler::stop`] cancels the shared token. Fetches already in flight
//! are allowed to finish.

mod config;
mod schedule;
mod stats;
mod traits;

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::feed::FetchError;
use crate::model::Feed;
use crate::predictor;
use crate::ratelimit::DomainRateLimiter;

pub use config::SchedulerConfig;
pub use schedule::{build_schedule, merge_feeds, priority, stagger_delay, ScheduledFeed};
pub use stats::{CycleStats, CycleSummary};
pub use traits::{FeedFetcher, FeedStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,
    #[error("Scheduler is not running")]
    NotRunning,
}

/// Point-in-time view for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub update_window_secs: u64,
    pub min_interval_secs: u64,
    pub max_concurrent: usize,
    pub cleanup_interval_secs: u64,
    /// Domains currently holding a rate limiter bucket
    pub tracked_domains: usize,
    pub last_cycle: Option<CycleSummary>,
}

struct RunState {
    running: bool,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn FeedStore>,
    fetcher: Arc<dyn FeedFetcher>,
    limiter: Arc<DomainRateLimiter>,
    config: SchedulerConfig,
    // Status reads only touch `state` and `last_cycle`, never `cycle_lock`
    state: RwLock<RunState>,
    last_cycle: RwLock<Option<CycleSummary>>,
    trigger: Notify,
    cycle_lock: Mutex<()>,
}

/// Handle to the polling scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn FeedStore>,
        fetcher: Arc<dyn FeedFetcher>,
        limiter: Arc<DomainRateLimiter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                limiter,
                config: config.normalized(),
                state: RwLock::new(RunState {
                    running: false,
                    shutdown: CancellationToken::new(),
                    tasks: Vec::new(),
                }),
                last_cycle: RwLock::new(None),
                trigger: Notify::new(),
                cycle_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }

    /// Spawns the cycle and cleanup loops. The first cycle starts immediately.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::AlreadyRunning`] if called twice without a `stop`.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if state.running {
            return Err(SchedulerError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        state.running = true;
        state.shutdown = shutdown.clone();
        state.tasks = vec![
            tokio::spawn(Arc::clone(&self.inner).cycle_loop(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.inner).cleanup_loop(shutdown)),
        ];

        tracing::info!(
            update_window_secs = self.inner.config.update_window.as_secs(),
            min_interval_secs = self.inner.config.min_interval.as_secs(),
            max_concurrent = self.inner.config.max_concurrent,
            "Scheduler started"
        );
        Ok(())
    }

    /// Cancels all loops and pending workers. Safe to call when stopped.
    pub fn stop(&self) {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !state.running {
            return;
        }
        state.running = false;
        state.shutdown.cancel();
        tracing::info!("Scheduler stopping");
    }

    /// Waits for the background loops spawned by [`start`](Self::start) to
    /// exit, including any fetches that were in flight at `stop`.
    pub async fn wait_stopped(&self) {
        let tasks = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut state.tasks)
        };
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    /// Asks the running scheduler to start a cycle now instead of waiting
    /// for the next tick.
    pub fn trigger_now(&self) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        self.inner.trigger.notify_one();
        Ok(())
    }

    /// Runs a single cycle to completion on the current task.
    ///
    /// Uses the live shutdown token while running, so `stop` also cuts a
    /// manual cycle short.
    pub async fn run_once(&self) -> CycleSummary {
        let shutdown = {
            let state = self
                .inner
                .state
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if state.running {
                state.shutdown.clone()
            } else {
                CancellationToken::new()
            }
        };
        self.inner.run_cycle(&shutdown).await
    }

    /// Snapshot for monitoring. Never waits on cycle work.
    pub fn status(&self) -> SchedulerStatus {
        let config = self.config();
        SchedulerStatus {
            is_running: self.is_running(),
            update_window_secs: config.update_window.as_secs(),
            min_interval_secs: config.min_interval.as_secs(),
            max_concurrent: config.max_concurrent,
            cleanup_interval_secs: config.cleanup_interval.as_secs(),
            tracked_domains: self.inner.limiter.domain_count(),
            last_cycle: self
                .inner
                .last_cycle
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl Inner {
    async fn cycle_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.update_window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {
                    tracing::debug!("Update cycle triggered on demand");
                }
            }
            self.run_cycle(&shutdown).await;
        }

        tracing::info!("Update cycle loop stopped");
    }

    async fn cleanup_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.cleanup_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.limiter.cleanup();
                    tracing::debug!(
                        removed = removed,
                        remaining = self.limiter.domain_count(),
                        "Swept idle rate limit buckets"
                    );
                }
            }
        }

        tracing::info!("Rate limiter cleanup loop stopped");
    }

    async fn run_cycle(self: &Arc<Self>, shutdown: &CancellationToken) -> CycleSummary {
        let _cycle = self.cycle_lock.lock().await;
        let started_at = Utc::now();
        let base = Instant::now();
        let stats = Arc::new(CycleStats::default());

        let feeds = match self.collect_feeds().await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load feeds, skipping update cycle");
                return self.finish_cycle(&stats, 0, started_at);
            }
        };

        let schedule = build_schedule(feeds, started_at, &self.config);
        let scheduled = schedule.len();
        tracing::info!(
            feeds = scheduled,
            window_secs = self.config.update_window.as_secs(),
            "Starting update cycle"
        );

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut workers = JoinSet::new();
        for slot in schedule {
            let inner = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let stats = Arc::clone(&stats);
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                inner
                    .dispatch(slot, base, &permits, &stats, &shutdown)
                    .await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Feed worker panicked");
            }
        }

        self.finish_cycle(&stats, scheduled, started_at)
    }

    fn finish_cycle(
        &self,
        stats: &CycleStats,
        scheduled: usize,
        started_at: chrono::DateTime<Utc>,
    ) -> CycleSummary {
        let summary = stats.summarize(scheduled, started_at, Utc::now());
        tracing::info!(
            scheduled = summary.scheduled,
            checked = summary.checked,
            skipped = summary.skipped,
            rate_limited = summary.rate_limited,
            failed = summary.failed,
            had_new_content = summary.had_new_content,
            "Update cycle complete"
        );
        *self
            .last_cycle
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());
        summary
    }

    async fn collect_feeds(&self) -> anyhow::Result<Vec<Feed>> {
        let global = self.store.list_global_feeds().await?;
        let user = self.store.list_all_user_feeds().await?;
        Ok(merge_feeds(global, user))
    }

    /// Waits for the slot and a permit, then checks the feed.
    async fn dispatch(
        &self,
        slot: ScheduledFeed,
        base: Instant,
        permits: &Semaphore,
        stats: &CycleStats,
        shutdown: &CancellationToken,
    ) {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep_until(base + slot.delay) => {}
        }

        let _permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            permit = permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        self.check_feed(slot.feed, stats).await;
    }

    async fn check_feed(&self, mut feed: Feed, stats: &CycleStats) {
        let now = Utc::now();

        if !predictor::should_check(&feed, now) {
            stats.record_not_due();
            tracing::debug!(feed_id = feed.id, "Feed not due, skipping");
            return;
        }

        if !self.limiter.allow(&feed.url) {
            stats.record_rate_limited();
            tracing::debug!(feed_id = feed.id, url = %feed.url, "Domain rate limited, skipping");
            return;
        }

        stats.record_checked();
        feed.last_fetch = Some(now);
        if let Err(e) = self.store.record_fetch_attempt(feed.id, now).await {
            tracing::warn!(feed_id = feed.id, error = %e, "Failed to record fetch attempt");
        }

        let had_new_content = match self.fetch_and_persist(&feed).await {
            Ok(saved) => {
                tracing::debug!(feed_id = feed.id, saved = saved, "Feed refreshed");
                saved > 0
            }
            Err(e) => {
                stats.record_failed();
                log_fetch_failure(&feed, &e);
                false
            }
        };
        if had_new_content {
            stats.record_new_content();
        }

        predictor::update_tracking(&mut feed, had_new_content, Utc::now());
        if let Err(e) = self.store.update_feed_tracking(&feed).await {
            tracing::warn!(feed_id = feed.id, error = %e, "Failed to update feed tracking");
        }
    }

    async fn fetch_and_persist(&self, feed: &Feed) -> Result<usize, FetchError> {
        let content = self.fetcher.fetch(&feed.url).await?;
        self.fetcher.persist_new_articles(feed.id, &content).await
    }
}

fn log_fetch_failure(feed: &Feed, error: &FetchError) {
    if error.is_ssrf_blocked() {
        tracing::warn!(
            target: "feedwarden::security",
            feed_id = feed.id,
            url = %feed.url,
            error = %error,
            "Feed URL blocked by SSRF guard"
        );
    } else if error.is_retryable() {
        tracing::warn!(
            feed_id = feed.id,
            url = %feed.url,
            error = %error,
            "Feed fetch failed, eligible again next cycle"
        );
    } else {
        tracing::warn!(
            feed_id = feed.id,
            url = %feed.url,
            error = %error,
            "Feed fetch failed"
        );
    }
}
