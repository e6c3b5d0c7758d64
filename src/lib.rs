//! Polite, SSRF-hardened polling of large sets of untrusted RSS/Atom feeds.
//!
//! The [`scheduler`] spreads fetches over an update window, consults the
//! adaptive [`predictor`] and the per-domain [`ratelimit`] before each one,
//! and hands due feeds to a [`FeedFetcher`](scheduler::FeedFetcher) whose
//! HTTP client is locked down by the [`guard`] module.

pub mod config;
pub mod feed;
pub mod guard;
pub mod model;
pub mod predictor;
pub mod ratelimit;
pub mod scheduler;
pub mod storage;
