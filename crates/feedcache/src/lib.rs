//! # feedcache
//!
//! Serialized, completion-based access to a single-slot feed store.
//!
//! ## Guarantees
//! - One worker thread admits operations strictly in submission order
//! - Each completion fires exactly once, after the operation's effect is
//!   committed or rolled back
//! - A failed insert or delete leaves the slot as it was
//! - Storage failures are reported, never retried

#![warn(missing_docs)]

mod cache;
mod stats;
mod worker;

pub use cache::{CachedFeed, FeedCache, RetrieveCompletion, WriteCompletion};
pub use feedstoredb::{CacheRecord, Error, Item, Result, Storage, StoreLocation};
pub use stats::CacheStats;
