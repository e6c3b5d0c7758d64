//! SQLite persistence: feeds with their scheduling fields, users,
//! subscriptions, and fetched articles. [`Database`] is the production
//! [`FeedStore`](crate::scheduler::FeedStore).

mod articles;
mod feeds;
mod schema;
mod types;

pub use schema::Database;
pub use types::DatabaseError;
