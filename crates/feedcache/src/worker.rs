//! Single worker that admits cache operations one at a time.
//!
//! The worker owns the storage adapter outright. Operations arrive over an
//! unbounded channel and are executed strictly in arrival order; each
//! operation's completion runs on the worker before the next one starts.
//! A panic in the adapter or in a completion is contained to the operation
//! that raised it.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use feedstoredb::{CacheRecord, Error, Result, Storage};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

use crate::cache::{CachedFeed, RetrieveCompletion, WriteCompletion};
use crate::stats::CacheStats;

/// Operations accepted by the worker queue
pub(crate) enum Operation {
    Retrieve {
        completion: RetrieveCompletion,
    },
    Insert {
        record: CacheRecord,
        completion: WriteCompletion,
    },
    Delete {
        completion: WriteCompletion,
    },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Retrieve { .. } => "retrieve",
            Operation::Insert { .. } => "insert",
            Operation::Delete { .. } => "delete",
        }
    }

    /// Complete the operation without running it
    pub(crate) fn reject(self, err: Error) {
        let name = self.name();
        match self {
            Operation::Retrieve { completion } => dispatch(name, completion, Err(err)),
            Operation::Insert { completion, .. } | Operation::Delete { completion } => {
                dispatch(name, completion, Err(err))
            }
        }
    }
}

/// Deliver a result, keeping the worker alive if the completion panics
fn dispatch<T>(name: &'static str, completion: Box<dyn FnOnce(T) + Send>, value: T) {
    if panic::catch_unwind(AssertUnwindSafe(move || completion(value))).is_err() {
        error!("Completion for {} panicked", name);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) struct Worker {
    storage: Box<dyn Storage>,
    stats: Arc<CacheStats>,
}

impl Worker {
    pub(crate) fn new(storage: Box<dyn Storage>, stats: Arc<CacheStats>) -> Self {
        Self { storage, stats }
    }

    pub(crate) fn spawn(self, receiver: UnboundedReceiver<Operation>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("feedcache-worker".to_string())
            .spawn(move || self.run(receiver))
    }

    fn run(mut self, mut receiver: UnboundedReceiver<Operation>) {
        debug!("Cache worker started");
        let mut processed = 0u64;

        // Returns None only once every sender is gone and the queue is drained.
        while let Some(op) = receiver.blocking_recv() {
            self.process(op);
            processed += 1;
        }

        debug!("Cache worker finished after {} operations", processed);
    }

    fn process(&mut self, op: Operation) {
        let name = op.name();
        debug!("Processing {}", name);

        match op {
            Operation::Retrieve { completion } => {
                let result = self.guarded(name, |worker| worker.retrieve());
                self.stats.record_retrieve();
                self.finish(name, completion, result);
            }
            Operation::Insert { record, completion } => {
                let result = self.guarded(name, |worker| worker.insert(&record));
                self.stats.record_insert();
                self.finish(name, completion, result);
            }
            Operation::Delete { completion } => {
                let result = self.guarded(name, |worker| worker.storage.delete_one());
                self.stats.record_delete();
                self.finish(name, completion, result);
            }
        }
    }

    /// Run a storage step, turning an adapter panic into an error
    fn guarded<T>(
        &mut self,
        name: &'static str,
        step: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        match panic::catch_unwind(AssertUnwindSafe(|| step(self))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("Storage panicked during {}: {}", name, msg);
                Err(Error::Panicked(msg))
            }
        }
    }

    fn finish<T>(
        &self,
        name: &'static str,
        completion: Box<dyn FnOnce(Result<T>) + Send>,
        result: Result<T>,
    ) {
        if let Err(e) = &result {
            warn!("{} failed: {}", name, e);
            self.stats.record_failure();
        }
        dispatch(name, completion, result);
    }

    fn retrieve(&mut self) -> Result<CachedFeed> {
        Ok(self.storage.fetch_one()?.into())
    }

    fn insert(&mut self, record: &CacheRecord) -> Result<()> {
        if self.storage.is_transactional() {
            return self.storage.replace_one(record);
        }

        // Without engine transactions the prior record has to be captured
        // first so a failed replace can be undone.
        let prior = self.storage.fetch_one()?;

        let err = match self.storage.replace_one(record) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        self.stats.record_rollback();
        let restored = match &prior {
            Some(prior) => self.storage.replace_one(prior),
            None => self.storage.delete_one(),
        };
        // A failed restore leaves the slot as the failed replace left it;
        // the caller still gets the replace error.
        match restored {
            Ok(()) => warn!("Insert failed, restored prior cache state"),
            Err(e) => error!("Insert failed and rollback failed: {}", e),
        }

        Err(err)
    }
}
