//! ComplyKit shared types
//!
//! Common types used by the API server, billing crate, and worker:
//! subscription enums, the subscriber record, and database pool
//! construction.

pub mod db;
pub mod types;

pub use db::create_pool;
pub use types::{SubscriberRecord, SubscriptionStatus, SubscriptionTier};
