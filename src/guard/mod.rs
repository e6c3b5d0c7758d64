//! SSRF protection for outbound feed requests.
//!
//! Every URL the scheduler fetches is untrusted input. This module:
//!
//! - **Normalizes** raw strings into absolute http(s) URLs ([`normalize_url`])
//! - **Validates** literal and resolved addresses against a deny-list of
//!   loopback, private, link-local, multicast and reserved ranges
//!   ([`UrlGuard::validate`])
//! - **Hardens** the HTTP client so redirects and connects are checked too
//!   ([`UrlGuard::client`])
//!
//! # Example
//!
//! ```ignore
//! use feedwarden::guard::{GuardConfig, UrlGuard};
//!
//! let guard = UrlGuard::new(GuardConfig::default());
//! let url = guard.validate("example.com/feed.xml").await?;
//! let client = guard.client("feedwarden/0.1")?;
//! let body = client.get(url).send().await?;
//! ```

mod client;
mod networks;
mod validator;

pub use client::{find_guard_error, MAX_REDIRECTS};
pub use networks::is_blocked_ip;
pub use validator::{
    normalize_url, GuardConfig, GuardError, HostResolver, SystemResolver, UrlGuard,
};
