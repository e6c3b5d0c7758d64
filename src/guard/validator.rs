use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::{Host, Url};

use super::networks::{is_blocked_ip, is_loopback_ip};

/// Errors that can occur during URL validation.
///
/// The three variants are deliberately disjoint so callers can react to each
/// one differently: invalid URLs and SSRF blocks are permanent, network
/// errors are transient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Malformed input, unsupported scheme, or missing host.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The host is, or resolves to, a non-public network address.
    #[error("Blocked request to non-public address {ip} (host {host})")]
    SsrfBlocked { host: String, ip: IpAddr },
    /// DNS resolution failed, timed out, or returned no addresses.
    #[error("Network error for {host}: {reason}")]
    Network { host: String, reason: String },
}

impl GuardError {
    /// Only network errors are worth trying again (on a later cycle).
    pub fn is_retryable(&self) -> bool {
        matches!(self, GuardError::Network { .. })
    }

    pub fn is_ssrf_blocked(&self) -> bool {
        matches!(self, GuardError::SsrfBlocked { .. })
    }
}

/// Hostname lookup used by [`UrlGuard`].
///
/// The system resolver is the default; tests swap in a static table.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolves through the operating system (`getaddrinfo`) via tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Validator settings.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Upper bound on a single DNS lookup
    pub dns_timeout: Duration,
    /// Permit loopback targets. Only for local development and tests.
    pub allow_loopback: bool,
}

impl GuardConfig {
    pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            dns_timeout: Self::DEFAULT_DNS_TIMEOUT,
            allow_loopback: false,
        }
    }
}

/// Normalizes a possibly protocol-less string into an absolute http(s) URL.
///
/// Trims whitespace and prefixes `https://` when no scheme is present.
/// Performs no network access; see [`UrlGuard::validate`] for the full check.
///
/// # Examples
///
/// ```
/// use feedwarden::guard::normalize_url;
///
/// let url = normalize_url("  example.com/feed.xml ").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
///
/// assert!(normalize_url("").is_err());
/// assert!(normalize_url("javascript:alert(1)").is_err());
/// ```
pub fn normalize_url(raw: &str) -> Result<Url, GuardError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GuardError::InvalidUrl("empty URL".to_owned()));
    }

    let candidate = if has_scheme(trimmed) {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| GuardError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(GuardError::InvalidUrl(format!(
                "unsupported scheme: {scheme} (only http/https allowed)"
            )))
        }
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(GuardError::InvalidUrl("missing host".to_owned())),
    }
}

/// Detects an explicit `scheme:` prefix.
///
/// `example.com:8080/feed` is a host with a port, not a scheme, so a colon
/// followed by a digit does not count.
fn has_scheme(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    starts_alpha && valid_tail && !rest.starts_with(|c: char| c.is_ascii_digit())
}

/// SSRF gate for every outbound feed request.
///
/// Cheap to clone; clones share the resolver.
#[derive(Clone)]
pub struct UrlGuard {
    config: GuardConfig,
    resolver: Arc<dyn HostResolver>,
}

impl fmt::Debug for UrlGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlGuard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for UrlGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

impl UrlGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    pub fn with_resolver(config: GuardConfig, resolver: Arc<dyn HostResolver>) -> Self {
        Self { config, resolver }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Normalizes `raw` and verifies that every address it names is public.
    ///
    /// # Errors
    ///
    /// - [`GuardError::InvalidUrl`] for malformed input or non-http(s) schemes
    /// - [`GuardError::SsrfBlocked`] if the literal IP, or *any* resolved IP,
    ///   is in a deny-listed range
    /// - [`GuardError::Network`] if resolution fails, times out, or is empty
    pub async fn validate(&self, raw: &str) -> Result<Url, GuardError> {
        let url = normalize_url(raw)?;
        self.check_url(&url).await?;
        Ok(url)
    }

    /// Runs the address checks on an already-normalized URL.
    pub async fn check_url(&self, url: &Url) -> Result<(), GuardError> {
        match url.host() {
            Some(Host::Ipv4(ip)) => self.check_ip(&ip.to_string(), IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => self.check_ip(&ip.to_string(), IpAddr::V6(ip)),
            Some(Host::Domain(domain)) => self.resolve(domain).await.map(|_| ()),
            None => Err(GuardError::InvalidUrl("missing host".to_owned())),
        }
    }

    /// Resolves `host` and returns its addresses, all of them verified.
    ///
    /// A single blocked address fails the whole lookup: a name that resolves
    /// to one public and one private address is not trusted.
    pub async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, GuardError> {
        let lookup = tokio::time::timeout(self.config.dns_timeout, self.resolver.lookup(host))
            .await
            .map_err(|_| GuardError::Network {
                host: host.to_owned(),
                reason: format!("DNS lookup timed out after {:?}", self.config.dns_timeout),
            })?
            .map_err(|e| GuardError::Network {
                host: host.to_owned(),
                reason: e.to_string(),
            })?;

        if lookup.is_empty() {
            return Err(GuardError::Network {
                host: host.to_owned(),
                reason: "no addresses found".to_owned(),
            });
        }

        for ip in &lookup {
            self.check_ip(host, *ip)?;
        }

        Ok(lookup)
    }

    /// Synchronous check of a single address.
    pub fn check_ip(&self, host: &str, ip: IpAddr) -> Result<(), GuardError> {
        if self.config.allow_loopback && is_loopback_ip(ip) {
            return Ok(());
        }
        if is_blocked_ip(ip) {
            return Err(GuardError::SsrfBlocked {
                host: host.to_owned(),
                ip,
            });
        }
        Ok(())
    }
}
