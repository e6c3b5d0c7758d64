//! Feed retrieval and parsing.
//!
//! - [`parser`] turns RSS, Atom and JSON Feed documents into [`FeedContent`]
//!   using the `feed-rs` crate
//! - [`fetcher`] provides [`HttpFetcher`], the production
//!   [`FeedFetcher`](crate::scheduler::FeedFetcher): guarded HTTP retrieval
//!   with a size cap, then article storage in SQLite
//!
//! [`FeedContent`]: crate::model::FeedContent

mod fetcher;
mod parser;

pub use fetcher::{FetchError, HttpFetcher};
pub use parser::{parse_feed, ParseResult};
