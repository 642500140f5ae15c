//! Record model: the feed items and the single cached record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// A single feed item
///
/// Items are plain values. The store enforces no uniqueness on `id`;
/// callers own de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item identity
    pub id: Uuid,
    /// Optional free-text description
    pub description: Option<String>,
    /// Optional free-text location
    pub location: Option<String>,
    /// Image URL
    pub url: Url,
}

impl Item {
    /// Create a new item
    pub fn new(id: Uuid, description: Option<String>, location: Option<String>, url: Url) -> Self {
        Self {
            id,
            description,
            location,
            url,
        }
    }
}

/// The one record a store slot can hold
///
/// Item order is significant and preserved. The file engine persists the
/// timestamp as whole seconds plus nanoseconds, so it round-trips exactly;
/// no sub-second truncation is applied anywhere in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Cached items, in insertion order
    pub items: Vec<Item>,
    /// When the feed was cached
    pub timestamp: DateTime<Utc>,
}

impl CacheRecord {
    /// Create a new record
    pub fn new(items: Vec<Item>, timestamp: DateTime<Utc>) -> Self {
        Self { items, timestamp }
    }

    /// Number of items in the record
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the record holds no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
