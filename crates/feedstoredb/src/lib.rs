//! # feedstoredb
//!
//! Durable single-slot storage for a cached feed.
//!
//! ## Model
//! - At most one [`CacheRecord`] exists per store
//! - Every replace fully supersedes the previous record
//! - Absence is a normal state, not an error
//!
//! ## Engines
//! - [`FileStorage`]: one data file, replaced atomically by write + rename
//! - [`MemoryStorage`]: process-local, for tests

#![warn(missing_docs)]

pub mod codec;
mod error;
mod memory;
mod model;
mod storage;

pub use error::{Error, Result};
pub use memory::MemoryStorage;
pub use model::{CacheRecord, Item};
pub use storage::{open_storage, FileStorage, Storage, StoreLocation};
