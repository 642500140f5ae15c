//! In-memory storage, mainly for tests

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::model::CacheRecord;
use crate::storage::Storage;

/// Memory-only single-slot storage
///
/// Clones share the same slot, so a test can keep a handle and inspect
/// what the cache committed. Nothing is persisted across restarts.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<RwLock<Option<CacheRecord>>>,
}

impl MemoryStorage {
    /// Create an empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the record currently in the slot
    pub fn snapshot(&self) -> Option<CacheRecord> {
        self.slot.read().clone()
    }
}

impl Storage for MemoryStorage {
    fn fetch_one(&mut self) -> Result<Option<CacheRecord>> {
        Ok(self.slot.read().clone())
    }

    fn replace_one(&mut self, record: &CacheRecord) -> Result<()> {
        *self.slot.write() = Some(record.clone());
        Ok(())
    }

    fn delete_one(&mut self) -> Result<()> {
        self.slot.write().take();
        Ok(())
    }
}
