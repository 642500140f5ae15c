//! Cache operation counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for operations the cache worker has completed
#[derive(Debug, Default)]
pub struct CacheStats {
    retrievals: AtomicU64,
    inserts: AtomicU64,
    deletes: AtomicU64,
    failures: AtomicU64,
    rollbacks: AtomicU64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed retrieve
    pub fn record_retrieve(&self) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed insert
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed delete
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation that completed with an error
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a compensating rollback after a failed insert
    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total retrievals
    pub fn retrievals(&self) -> u64 {
        self.retrievals.load(Ordering::Relaxed)
    }

    /// Get total inserts
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Get total deletes
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Get total failures
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get total rollbacks
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Total operations processed, successful or not
    pub fn total(&self) -> u64 {
        self.retrievals() + self.inserts() + self.deletes()
    }

    /// Fraction of operations that failed (0.0 to 1.0)
    pub fn failure_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.failures() as f64 / total as f64
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.retrievals.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
    }
}
