//! FeedCache: serialized retrieve/insert/delete over a single-slot store

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use feedstoredb::{open_storage, CacheRecord, Error, Item, Result, Storage, StoreLocation};
use tokio::sync::{mpsc, oneshot};

use crate::stats::CacheStats;
use crate::worker::{Operation, Worker};

/// Outcome of a successful retrieve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedFeed {
    /// The slot holds no record
    Empty,
    /// The slot's record, items in stored order
    Found {
        /// Cached items
        items: Vec<Item>,
        /// When the items were cached
        timestamp: DateTime<Utc>,
    },
}

impl CachedFeed {
    /// Check if nothing was cached
    pub fn is_empty(&self) -> bool {
        matches!(self, CachedFeed::Empty)
    }

    /// Convert back into the stored record, if any
    pub fn into_record(self) -> Option<CacheRecord> {
        match self {
            CachedFeed::Empty => None,
            CachedFeed::Found { items, timestamp } => Some(CacheRecord { items, timestamp }),
        }
    }
}

impl From<Option<CacheRecord>> for CachedFeed {
    fn from(record: Option<CacheRecord>) -> Self {
        match record {
            Some(CacheRecord { items, timestamp }) => CachedFeed::Found { items, timestamp },
            None => CachedFeed::Empty,
        }
    }
}

/// Completion for [`FeedCache::retrieve`]
pub type RetrieveCompletion = Box<dyn FnOnce(Result<CachedFeed>) + Send + 'static>;

/// Completion for [`FeedCache::insert`] and [`FeedCache::delete`]
pub type WriteCompletion = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Serialized feed cache
///
/// Every operation is queued to one worker thread and runs to completion
/// in submission order. Submitting never blocks; the result is handed to
/// the operation's completion, on the worker thread, once its effect on
/// the storage is committed or rolled back.
///
/// Dropping the last handle behaves like [`FeedCache::close`] and blocks
/// the same way.
pub struct FeedCache {
    /// Submission side of the worker queue
    queue: Option<mpsc::UnboundedSender<Operation>>,

    /// Worker thread owning the storage adapter
    worker: Option<JoinHandle<()>>,

    /// Operation statistics
    stats: Arc<CacheStats>,
}

impl FeedCache {
    /// Open a cache at the given location
    ///
    /// # Arguments
    /// * `location` - Store directory, or in-memory
    ///
    /// # Returns
    /// * `Result<FeedCache>` - Cache handle with a running worker
    pub fn open(location: &StoreLocation) -> Result<Self> {
        let storage = open_storage(location)?;
        Self::with_storage(storage)
    }

    /// Open a cache that keeps nothing across restarts
    pub fn in_memory() -> Result<Self> {
        Self::open(&StoreLocation::InMemory)
    }

    /// Run a cache over any storage adapter
    pub fn with_storage<S: Storage>(storage: S) -> Result<Self> {
        let (queue, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(CacheStats::new());

        let worker = Worker::new(Box::new(storage), Arc::clone(&stats)).spawn(receiver)?;

        Ok(Self {
            queue: Some(queue),
            worker: Some(worker),
            stats,
        })
    }

    fn submit(&self, op: Operation) {
        match &self.queue {
            Some(queue) => {
                if let Err(mpsc::error::SendError(op)) = queue.send(op) {
                    op.reject(Error::Closed);
                }
            }
            None => op.reject(Error::Closed),
        }
    }

    /// Retrieve the cached feed
    ///
    /// Never mutates the slot, including on failure.
    pub fn retrieve<F>(&self, completion: F)
    where
        F: FnOnce(Result<CachedFeed>) + Send + 'static,
    {
        self.submit(Operation::Retrieve {
            completion: Box::new(completion),
        });
    }

    /// Replace the cached feed with `items` and `timestamp`
    ///
    /// On failure the slot keeps whatever it held before this call.
    pub fn insert<F>(&self, items: Vec<Item>, timestamp: DateTime<Utc>, completion: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(Operation::Insert {
            record: CacheRecord::new(items, timestamp),
            completion: Box::new(completion),
        });
    }

    /// Empty the cache. Deleting an empty cache succeeds.
    pub fn delete<F>(&self, completion: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(Operation::Delete {
            completion: Box::new(completion),
        });
    }

    /// Retrieve, suspending the calling task until the result arrives
    pub async fn retrieve_async(&self) -> Result<CachedFeed> {
        let (tx, rx) = oneshot::channel();
        self.retrieve(move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Insert, suspending the calling task until the result arrives
    pub async fn insert_async(&self, items: Vec<Item>, timestamp: DateTime<Utc>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.insert(items, timestamp, move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Delete, suspending the calling task until the result arrives
    pub async fn delete_async(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.delete(move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Get operation statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Stop accepting work, finish everything queued, then release storage
    ///
    /// Blocks the calling thread until the worker has drained the queue.
    /// From async code, run it on a blocking thread:
    ///
    /// ```no_run
    /// # async fn shut(cache: feedcache::FeedCache) {
    /// tokio::task::spawn_blocking(move || cache.close()).await.unwrap().unwrap();
    /// # }
    /// ```
    pub fn close(mut self) -> Result<()> {
        if self.shutdown() {
            Ok(())
        } else {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "cache worker panicked",
            )))
        }
    }

    /// Returns false if the worker thread panicked
    fn shutdown(&mut self) -> bool {
        // Hanging up lets the worker drain the queue and exit.
        self.queue.take();

        match self.worker.take() {
            // Dropped from inside a completion; the worker exits on its own.
            Some(handle) if handle.thread().id() == thread::current().id() => true,
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl Drop for FeedCache {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
