use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::Policy;
use url::Host;

use super::validator::{GuardError, UrlGuard};

/// Maximum redirect hops followed for a single feed request.
pub const MAX_REDIRECTS: usize = 10;

impl UrlGuard {
    /// Builds the HTTP client used for every feed fetch.
    ///
    /// Two layers apply the same deny-list the validator uses:
    ///
    /// - the redirect policy re-checks each hop's scheme and literal IP and
    ///   caps chains at [`MAX_REDIRECTS`];
    /// - the DNS resolver refuses to hand any blocked address to the
    ///   connector, so hostnames are verified against the addresses that are
    ///   actually dialed (no gap between validation and connect).
    pub fn client(&self, user_agent: &str) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(self.redirect_policy())
            .dns_resolver(Arc::new(GuardedResolver {
                guard: self.clone(),
            }))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
    }

    fn redirect_policy(&self) -> Policy {
        let guard = self.clone();
        Policy::custom(move |attempt| {
            // `previous` includes the original request URL
            if attempt.previous().len() > MAX_REDIRECTS {
                return attempt.error(format!("Too many redirects (max {MAX_REDIRECTS})"));
            }

            let url = attempt.url();
            for prev in attempt.previous() {
                if prev.as_str() == url.as_str() {
                    return attempt.error("Redirect loop detected");
                }
            }

            if !matches!(url.scheme(), "http" | "https") {
                let msg = format!("redirect to unsupported scheme: {}", url.scheme());
                return attempt.error(GuardError::InvalidUrl(msg));
            }

            // Hostnames are checked by the resolver when the hop connects
            let literal: Option<(String, IpAddr)> = match url.host() {
                Some(Host::Ipv4(ip)) => Some((ip.to_string(), ip.into())),
                Some(Host::Ipv6(ip)) => Some((ip.to_string(), ip.into())),
                Some(Host::Domain(_)) => None,
                None => return attempt.error(GuardError::InvalidUrl("redirect without host".into())),
            };
            if let Some((host, ip)) = literal {
                if let Err(e) = guard.check_ip(&host, ip) {
                    tracing::warn!(to = %url, error = %e, "Blocked redirect to non-public address");
                    return attempt.error(e);
                }
            }

            tracing::debug!(
                from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
                to = %url,
                hop = attempt.previous().len() + 1,
                "Following redirect"
            );

            attempt.follow()
        })
    }
}

/// DNS resolver that only returns addresses the guard accepts.
struct GuardedResolver {
    guard: UrlGuard,
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let guard = self.guard.clone();
        Box::pin(async move {
            let ips = guard.resolve(name.as_str()).await.map_err(|e| {
                if e.is_ssrf_blocked() {
                    tracing::warn!(host = %name.as_str(), error = %e, "Blocked connection to non-public address");
                }
                Box::new(e) as Box<dyn StdError + Send + Sync>
            })?;
            // Port is replaced by the connector with the URL's port
            let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

/// Digs a [`GuardError`] out of an error's source chain.
///
/// reqwest wraps resolver and redirect-policy failures, so an SSRF block
/// raised mid-request surfaces as a generic `reqwest::Error`.
pub fn find_guard_error(err: &(dyn StdError + 'static)) -> Option<GuardError> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(guard_err) = e.downcast_ref::<GuardError>() {
            return Some(guard_err.clone());
        }
        current = e.source();
    }
    None
}
