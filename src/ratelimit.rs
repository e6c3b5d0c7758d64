//! Per-origin token bucket rate limiting.
//!
//! Each normalized domain gets its own bucket, created lazily on first use
//! and reclaimed by [`DomainRateLimiter::cleanup`] once it has refilled to
//! capacity. The defaults (6 requests/minute, burst 1) allow one request to
//! a given origin every 10 seconds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// The URL has no usable host to key a bucket on.
    #[error("Cannot determine domain for URL: {0}")]
    InvalidUrl(String),
    /// The caller gave up before a token became available.
    #[error("Wait for rate limit token cancelled")]
    Cancelled,
}

/// Rate limiter settings. Non-positive values fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub requests_per_minute: i64,
    pub burst_size: i64,
}

impl RateLimiterConfig {
    pub const DEFAULT_REQUESTS_PER_MINUTE: i64 = 6;
    pub const DEFAULT_BURST_SIZE: i64 = 1;

    /// Replaces non-positive fields with their defaults.
    pub fn normalized(self) -> Self {
        Self {
            requests_per_minute: if self.requests_per_minute > 0 {
                self.requests_per_minute
            } else {
                Self::DEFAULT_REQUESTS_PER_MINUTE
            },
            burst_size: if self.burst_size > 0 {
                self.burst_size
            } else {
                Self::DEFAULT_BURST_SIZE
            },
        }
    }

    /// Refill rate in tokens per second.
    pub fn tokens_per_second(&self) -> f64 {
        self.normalized().requests_per_minute as f64 / 60.0
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: Self::DEFAULT_REQUESTS_PER_MINUTE,
            burst_size: Self::DEFAULT_BURST_SIZE,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes a token, or reports how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.rate))
        }
    }

    fn is_full(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= self.capacity
    }
}

/// Token bucket limiter keyed by origin domain.
///
/// The domain map sits behind a reader/writer lock: token checks share the
/// read lock and only bucket creation and cleanup take it exclusively. Each
/// bucket carries its own mutex for the token arithmetic.
#[derive(Debug)]
pub struct DomainRateLimiter {
    config: RateLimiterConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl Default for DomainRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl DomainRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config: config.normalized(),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Non-blocking: takes a token for the URL's domain if one is available.
    ///
    /// Returns `false` when rate limited and also when the URL has no usable
    /// host, so unparseable input is never let through.
    pub fn allow(&self, url: &str) -> bool {
        let Some(domain) = domain_key(url) else {
            tracing::debug!(url = %url, "Cannot extract domain, denying request");
            return false;
        };
        self.take(&domain, Instant::now()).is_ok()
    }

    /// Waits until a token for the URL's domain is available.
    ///
    /// # Errors
    ///
    /// - [`RateLimitError::InvalidUrl`] immediately if no domain can be extracted
    /// - [`RateLimitError::Cancelled`] if `cancel` fires while waiting
    pub async fn wait(&self, url: &str, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        let domain = domain_key(url).ok_or_else(|| RateLimitError::InvalidUrl(url.to_owned()))?;
        loop {
            match self.take(&domain, Instant::now()) {
                Ok(()) => return Ok(()),
                Err(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Drops every bucket that has refilled to capacity.
    ///
    /// A full bucket is indistinguishable from a freshly created one, so
    /// removing it loses no state. Returns the number of buckets removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            !bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_full(now)
        });
        before - buckets.len()
    }

    /// Number of domains currently holding a bucket.
    pub fn domain_count(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take(&self, domain: &str, now: Instant) -> Result<(), Duration> {
        // The read lock is held across the token take so cleanup cannot
        // reclaim a bucket between lookup and use.
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(domain) {
                let result = bucket
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .try_take(now);
                return result;
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between the two locks
        let bucket = buckets.entry(domain.to_owned()).or_insert_with(|| {
            tracing::trace!(domain = %domain, "Creating rate limit bucket");
            Arc::new(Mutex::new(TokenBucket::full(
                self.config.burst_size as f64,
                self.config.tokens_per_second(),
                now,
            )))
        });
        let result = bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_take(now);
        result
    }
}

/// Normalizes a URL's origin into a bucket key.
///
/// Lower-cases the host, strips a leading `www.`, and appends the port when
/// the URL spells one out (default ports included). Returns `None` when the
/// URL has no host.
pub fn domain_key(url: &str) -> Option<String> {
    let raw = url.trim();
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    let host = host.strip_prefix("www.").unwrap_or(&host).to_owned();
    Some(match explicit_port(raw, &parsed) {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

fn explicit_port(raw: &str, parsed: &Url) -> Option<u16> {
    if let Some(port) = parsed.port() {
        return Some(port);
    }
    // `Url` drops a port equal to the scheme default; recover it from the input
    let default = parsed.port_or_known_default()?;
    let rest = raw.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    host_port.ends_with(&format!(":{default}")).then_some(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rpm: i64, burst: i64) -> DomainRateLimiter {
        DomainRateLimiter::new(RateLimiterConfig {
            requests_per_minute: rpm,
            burst_size: burst,
        })
    }

    #[test]
    fn test_domain_key_normalization() {
        assert_eq!(
            domain_key("https://WWW.Example.COM/feed").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            domain_key("https://example.com/other").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            domain_key("http://example.com:8080/rss").as_deref(),
            Some("example.com:8080")
        );
        assert_eq!(
            domain_key("http://example.com:80/a").as_deref(),
            Some("example.com:80")
        );
        assert_eq!(
            domain_key("https://Example.com:443/a").as_deref(),
            Some("example.com:443")
        );
        assert_eq!(
            domain_key("https://user:pw@example.com/a").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            domain_key("http://[::1]:80/feed").as_deref(),
            Some("[::1]:80")
        );
        assert_eq!(domain_key("not a url"), None);
        assert_eq!(domain_key("mailto:someone@example.com"), None);
    }

    #[test]
    fn test_limiter_normalizes_its_config() {
        assert_eq!(limiter(0, -1).config(), RateLimiterConfig::default());
        assert_eq!(limiter(12, 3).config().burst_size, 3);
    }

    #[test]
    fn test_config_defaults_for_non_positive() {
        let config = RateLimiterConfig {
            requests_per_minute: 0,
            burst_size: -3,
        }
        .normalized();
        assert_eq!(config, RateLimiterConfig::default());
        assert_eq!(config.requests_per_minute, 6);
        assert_eq!(config.burst_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_denied() {
        let limiter = limiter(6, 3);
        assert!(limiter.allow("https://example.com/a"));
        assert!(limiter.allow("https://example.com/b"));
        assert!(limiter.allow("https://example.com/c"));
        assert!(!limiter.allow("https://example.com/d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_after_interval() {
        let limiter = limiter(6, 1);
        assert!(limiter.allow("https://example.com/a"));
        assert!(!limiter.allow("https://example.com/a"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!limiter.allow("https://example.com/a"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.allow("https://example.com/a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_www_and_case_share_bucket() {
        let limiter = limiter(6, 1);
        assert!(limiter.allow("https://www.example.com/feed"));
        assert!(!limiter.allow("https://EXAMPLE.com/other"));
        assert_eq!(limiter.domain_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_and_ports_isolated() {
        let limiter = limiter(6, 1);
        assert!(limiter.allow("https://a.example.com/feed"));
        assert!(limiter.allow("https://b.example.com/feed"));
        assert!(limiter.allow("https://a.example.com:8443/feed"));
        assert!(!limiter.allow("https://a.example.com/feed"));
        assert_eq!(limiter.domain_count(), 3);
    }

    #[test]
    fn test_malformed_url_denied() {
        let limiter = DomainRateLimiter::default();
        assert!(!limiter.allow(""));
        assert!(!limiter.allow("::::"));
        assert_eq!(limiter.domain_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_full_buckets() {
        let limiter = limiter(6, 1);
        assert!(limiter.allow("https://old.example.com/"));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.allow("https://fresh.example.com/"));

        // old.example.com has refilled, fresh.example.com has not
        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.domain_count(), 1);
        assert!(!limiter.allow("https://fresh.example.com/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_token() {
        let limiter = limiter(6, 1);
        let cancel = CancellationToken::new();
        assert!(limiter.allow("https://example.com/"));

        let started = Instant::now();
        limiter.wait("https://example.com/", &cancel).await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(9), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(11), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_wait_malformed_fails_immediately() {
        let limiter = DomainRateLimiter::default();
        let cancel = CancellationToken::new();
        assert_eq!(
            limiter.wait("no host here", &cancel).await,
            Err(RateLimitError::InvalidUrl("no host here".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancelled() {
        let limiter = limiter(1, 1);
        let cancel = CancellationToken::new();
        assert!(limiter.allow("https://example.com/"));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        assert_eq!(
            limiter.wait("https://example.com/", &cancel).await,
            Err(RateLimitError::Cancelled)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_create_one_bucket() {
        let limiter = Arc::new(limiter(6, 1));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.allow("https://race.example.com/feed")
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 1);
        assert_eq!(limiter.domain_count(), 1);
    }
}
