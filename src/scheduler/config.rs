use std::time::Duration;

/// Scheduler timing and concurrency settings.
///
/// Zero durations and a zero `max_concurrent` are replaced by the defaults
/// when the scheduler is constructed; oversized values are capped (see
/// [`SchedulerConfig::normalized`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Span over which one cycle's feeds are staggered; also the cycle period
    pub update_window: Duration,
    /// Minimum spacing between two fetches of the same feed
    pub min_interval: Duration,
    /// Upper bound on simultaneous fetches
    pub max_concurrent: usize,
    /// Period of the rate limiter's idle-bucket sweep
    pub cleanup_interval: Duration,
}

impl SchedulerConfig {
    pub const DEFAULT_UPDATE_WINDOW: Duration = Duration::from_secs(6 * 60 * 60);
    pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_MAX_CONCURRENT: usize = 10;
    pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
    /// Longest accepted duration setting (one year); deadlines built from
    /// larger values would overflow `Instant`.
    pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);
    pub const MAX_CONCURRENT: usize = 10_000;

    /// Builds a config from raw second/count values, as found in config files.
    /// Non-positive values select the default.
    pub fn from_secs(
        update_window_secs: i64,
        min_interval_secs: i64,
        max_concurrent: i64,
        cleanup_interval_secs: i64,
    ) -> Self {
        fn secs(value: i64) -> Duration {
            u64::try_from(value).map(Duration::from_secs).unwrap_or(Duration::ZERO)
        }
        Self {
            update_window: secs(update_window_secs),
            min_interval: secs(min_interval_secs),
            max_concurrent: usize::try_from(max_concurrent).unwrap_or(0),
            cleanup_interval: secs(cleanup_interval_secs),
        }
        .normalized()
    }

    /// Replaces zero fields with their defaults and caps durations.
    pub fn normalized(self) -> Self {
        fn or(value: Duration, default: Duration) -> Duration {
            if value.is_zero() {
                default
            } else {
                value.min(SchedulerConfig::MAX_DURATION)
            }
        }
        Self {
            update_window: or(self.update_window, Self::DEFAULT_UPDATE_WINDOW),
            min_interval: or(self.min_interval, Self::DEFAULT_MIN_INTERVAL),
            max_concurrent: if self.max_concurrent == 0 {
                Self::DEFAULT_MAX_CONCURRENT
            } else {
                self.max_concurrent.min(Self::MAX_CONCURRENT)
            },
            cleanup_interval: or(self.cleanup_interval, Self::DEFAULT_CLEANUP_INTERVAL),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_window: Self::DEFAULT_UPDATE_WINDOW,
            min_interval: Self::DEFAULT_MIN_INTERVAL,
            max_concurrent: Self::DEFAULT_MAX_CONCURRENT,
            cleanup_interval: Self::DEFAULT_CLEANUP_INTERVAL,
        }
    }
}
