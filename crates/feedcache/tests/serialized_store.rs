use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, TimeZone, Utc};
use feedcache::{CacheRecord, CachedFeed, Error, FeedCache, Item, Result, Storage};
use feedstoredb::MemoryStorage;
use parking_lot::Mutex;
use url::Url;
use uuid::Uuid;

/// Number of upcoming calls of each kind that should fail
#[derive(Debug, Default)]
struct Faults {
    fetch: usize,
    replace: usize,
    delete: usize,
}

fn take(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

fn injected() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, "injected failure"))
}

/// Memory storage with scripted failures.
///
/// When not transactional, a failing replace wipes the slot before
/// erroring, like a delete-then-write engine that died half way.
#[derive(Clone)]
struct ScriptedStorage {
    slot: MemoryStorage,
    faults: Arc<Mutex<Faults>>,
    transactional: bool,
}

impl ScriptedStorage {
    fn new(transactional: bool) -> Self {
        Self {
            slot: MemoryStorage::new(),
            faults: Arc::new(Mutex::new(Faults::default())),
            transactional,
        }
    }
}

impl Storage for ScriptedStorage {
    fn fetch_one(&mut self) -> Result<Option<CacheRecord>> {
        if take(&mut self.faults.lock().fetch) {
            return Err(injected());
        }
        self.slot.fetch_one()
    }

    fn replace_one(&mut self, record: &CacheRecord) -> Result<()> {
        if take(&mut self.faults.lock().replace) {
            if !self.transactional {
                self.slot.delete_one()?;
            }
            return Err(injected());
        }
        self.slot.replace_one(record)
    }

    fn delete_one(&mut self) -> Result<()> {
        if take(&mut self.faults.lock().delete) {
            return Err(injected());
        }
        self.slot.delete_one()
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }
}

/// Memory storage whose reads panic
struct PanickingReads(MemoryStorage);

impl Storage for PanickingReads {
    fn fetch_one(&mut self) -> Result<Option<CacheRecord>> {
        panic!("fetch exploded");
    }

    fn replace_one(&mut self, record: &CacheRecord) -> Result<()> {
        self.0.replace_one(record)
    }

    fn delete_one(&mut self) -> Result<()> {
        self.0.delete_one()
    }
}

fn items(seed: u128, count: usize) -> Vec<Item> {
    (0..count as u128)
        .map(|i| {
            Item::new(
                Uuid::from_u128((seed << 32) | i),
                Some(format!("feed {} item {}", seed, i)),
                None,
                Url::parse(&format!("https://example.com/{}/{}.jpg", seed, i)).unwrap(),
            )
        })
        .collect()
}

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn found(seed: u128, count: usize, secs: i64) -> CachedFeed {
    CachedFeed::Found {
        items: items(seed, count),
        timestamp: ts(secs),
    }
}

fn retrieve(cache: &FeedCache) -> Result<CachedFeed> {
    let (tx, rx) = mpsc::channel();
    cache.retrieve(move |result| tx.send(result).unwrap());
    rx.recv().unwrap()
}

fn insert(cache: &FeedCache, seed: u128, secs: i64) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    cache.insert(items(seed, 3), ts(secs), move |result| tx.send(result).unwrap());
    rx.recv().unwrap()
}

fn delete(cache: &FeedCache) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    cache.delete(move |result| tx.send(result).unwrap());
    rx.recv().unwrap()
}

#[test]
fn retrieve_failure_has_no_side_effects() {
    let storage = ScriptedStorage::new(true);
    let faults = Arc::clone(&storage.faults);
    let cache = FeedCache::with_storage(storage).unwrap();

    insert(&cache, 1, 10).unwrap();
    faults.lock().fetch = 2;

    assert!(matches!(retrieve(&cache), Err(Error::Io(_))));
    assert!(matches!(retrieve(&cache), Err(Error::Io(_))));
    assert_eq!(retrieve(&cache).unwrap(), found(1, 3, 10));
    assert_eq!(cache.stats().failures(), 2);
}

#[test]
fn insert_failure_keeps_prior_record() {
    let storage = ScriptedStorage::new(true);
    let faults = Arc::clone(&storage.faults);
    let cache = FeedCache::with_storage(storage).unwrap();

    faults.lock().replace = 1;
    assert!(insert(&cache, 1, 10).is_err());
    assert_eq!(retrieve(&cache).unwrap(), CachedFeed::Empty);

    insert(&cache, 1, 10).unwrap();
    faults.lock().replace = 1;
    assert!(insert(&cache, 2, 20).is_err());
    assert_eq!(retrieve(&cache).unwrap(), found(1, 3, 10));
    assert_eq!(cache.stats().rollbacks(), 0);
}

#[test]
fn partial_insert_is_rolled_back() {
    let storage = ScriptedStorage::new(false);
    let faults = Arc::clone(&storage.faults);
    let slot = storage.slot.clone();
    let cache = FeedCache::with_storage(storage).unwrap();

    insert(&cache, 1, 10).unwrap();
    faults.lock().replace = 1;

    assert!(matches!(insert(&cache, 2, 20), Err(Error::Io(_))));
    assert_eq!(retrieve(&cache).unwrap(), found(1, 3, 10));
    assert_eq!(slot.snapshot().unwrap().items, items(1, 3));
    assert_eq!(cache.stats().rollbacks(), 1);
}

#[test]
fn partial_insert_on_empty_slot_rolls_back_to_empty() {
    let storage = ScriptedStorage::new(false);
    let faults = Arc::clone(&storage.faults);
    let cache = FeedCache::with_storage(storage).unwrap();

    faults.lock().replace = 1;

    assert!(insert(&cache, 1, 10).is_err());
    assert_eq!(retrieve(&cache).unwrap(), CachedFeed::Empty);
    assert_eq!(cache.stats().rollbacks(), 1);
}

#[test]
fn failed_rollback_reports_the_replace_error() {
    let storage = ScriptedStorage::new(false);
    let faults = Arc::clone(&storage.faults);
    let cache = FeedCache::with_storage(storage).unwrap();

    insert(&cache, 1, 10).unwrap();
    // The replace wipes the slot and fails, then the restore fails too.
    faults.lock().replace = 2;

    assert!(matches!(insert(&cache, 2, 20), Err(Error::Io(_))));
    assert_eq!(retrieve(&cache).unwrap(), CachedFeed::Empty);
    assert_eq!(cache.stats().rollbacks(), 1);
    assert_eq!(cache.stats().failures(), 1);
}

#[test]
fn failed_snapshot_aborts_insert_before_writing() {
    let storage = ScriptedStorage::new(false);
    let faults = Arc::clone(&storage.faults);
    let cache = FeedCache::with_storage(storage).unwrap();

    insert(&cache, 1, 10).unwrap();
    faults.lock().fetch = 1;

    assert!(insert(&cache, 2, 20).is_err());
    assert_eq!(retrieve(&cache).unwrap(), found(1, 3, 10));
    assert_eq!(cache.stats().rollbacks(), 0);
}

#[test]
fn delete_failure_keeps_slot_state() {
    let storage = ScriptedStorage::new(true);
    let faults = Arc::clone(&storage.faults);
    let cache = FeedCache::with_storage(storage).unwrap();

    faults.lock().delete = 1;
    assert!(delete(&cache).is_err());
    assert_eq!(retrieve(&cache).unwrap(), CachedFeed::Empty);

    insert(&cache, 1, 10).unwrap();
    faults.lock().delete = 1;
    assert!(delete(&cache).is_err());
    assert_eq!(retrieve(&cache).unwrap(), found(1, 3, 10));

    delete(&cache).unwrap();
    assert_eq!(retrieve(&cache).unwrap(), CachedFeed::Empty);
}

#[test]
fn completion_fires_after_effect_is_committed() {
    let slot = MemoryStorage::new();
    let observer = slot.clone();
    let cache = FeedCache::with_storage(slot).unwrap();
    let (tx, rx) = mpsc::channel();

    cache.insert(items(4, 2), ts(40), move |result| {
        tx.send((result.is_ok(), observer.snapshot())).unwrap();
    });

    let (ok, committed) = rx.recv().unwrap();
    assert!(ok);
    assert_eq!(committed, Some(CacheRecord::new(items(4, 2), ts(40))));
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Insert(u128),
    Delete,
}

#[test]
fn concurrent_side_effects_run_serially() {
    const CALLERS: u128 = 4;
    const OPS_PER_CALLER: u128 = 50;

    let cache = Arc::new(FeedCache::in_memory().unwrap());
    let log = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..CALLERS)
        .map(|caller| {
            let cache = Arc::clone(&cache);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for seq in 0..OPS_PER_CALLER {
                    let log = Arc::clone(&log);
                    if seq % 3 == 2 {
                        cache.delete(move |result| {
                            assert!(result.is_ok());
                            log.lock().push((caller, seq, Step::Delete));
                        });
                    } else {
                        let seed = caller * 1000 + seq;
                        cache.insert(items(seed, 2), ts(seed as i64), move |result| {
                            assert!(result.is_ok());
                            log.lock().push((caller, seq, Step::Insert(seed)));
                        });
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Submitted after every caller finished, so it runs after all of them.
    let last = retrieve(&cache).unwrap();
    let log = log.lock().clone();
    assert_eq!(log.len(), (CALLERS * OPS_PER_CALLER) as usize);

    // Per-caller submission order is preserved.
    for caller in 0..CALLERS {
        let seqs: Vec<_> = log
            .iter()
            .filter(|(c, _, _)| *c == caller)
            .map(|(_, seq, _)| *seq)
            .collect();
        assert_eq!(seqs, (0..OPS_PER_CALLER).collect::<Vec<_>>());
    }

    // Replaying the completion order sequentially gives the final state.
    let mut model = CachedFeed::Empty;
    for (_, _, step) in &log {
        model = match step {
            Step::Insert(seed) => found(*seed, 2, *seed as i64),
            Step::Delete => CachedFeed::Empty,
        };
    }
    assert_eq!(last, model);
}

#[test]
fn operations_chained_from_completions_stay_ordered() {
    let cache = Arc::new(FeedCache::in_memory().unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();

    let chained = Arc::clone(&cache);
    let log = Arc::clone(&order);
    cache.insert(items(1, 1), ts(1), move |result| {
        assert!(result.is_ok());
        log.lock().push("insert");

        let next = Arc::clone(&chained);
        let log = Arc::clone(&log);
        chained.delete(move |result| {
            assert!(result.is_ok());
            log.lock().push("delete");

            next.retrieve(move |result| {
                log.lock().push("retrieve");
                tx.send(result).unwrap();
            });
        });
    });

    assert_eq!(rx.recv().unwrap().unwrap(), CachedFeed::Empty);
    assert_eq!(*order.lock(), vec!["insert", "delete", "retrieve"]);
}

#[test]
fn every_completion_fires_exactly_once() {
    let cache = FeedCache::in_memory().unwrap();
    let (tx, rx) = mpsc::channel();

    for n in 0..100u128 {
        let tx = tx.clone();
        match n % 3 {
            0 => cache.insert(items(n, 1), ts(n as i64), move |_| tx.send(n).unwrap()),
            1 => cache.retrieve(move |_| tx.send(n).unwrap()),
            _ => cache.delete(move |_| tx.send(n).unwrap()),
        }
    }
    drop(tx);
    cache.close().unwrap();

    let fired: Vec<u128> = rx.iter().collect();
    assert_eq!(fired, (0..100u128).collect::<Vec<_>>());
}

#[test]
fn last_handle_may_be_dropped_inside_completion() {
    let cache = Arc::new(FeedCache::in_memory().unwrap());
    let inner = Arc::clone(&cache);
    let (tx, rx) = mpsc::channel();

    cache.retrieve(move |result| {
        // Whichever handle goes last, nobody joins the worker from itself.
        drop(inner);
        tx.send(result.is_ok()).unwrap();
    });
    drop(cache);

    assert!(rx.recv().unwrap());
}

#[test]
fn storage_panic_fails_that_operation_and_worker_keeps_serving() {
    let cache = FeedCache::with_storage(PanickingReads(MemoryStorage::new())).unwrap();
    let (tx, rx) = mpsc::channel();

    let retrieved = tx.clone();
    cache.retrieve(move |result| {
        retrieved
            .send(("retrieve", matches!(result, Err(Error::Panicked(_)))))
            .unwrap()
    });
    let inserted = tx.clone();
    cache.insert(items(1, 1), ts(1), move |result| {
        inserted.send(("insert", result.is_ok())).unwrap()
    });
    cache.delete(move |result| tx.send(("delete", result.is_ok())).unwrap());

    let fired: Vec<_> = rx.iter().take(3).collect();
    assert_eq!(fired, vec![("retrieve", true), ("insert", true), ("delete", true)]);
    assert_eq!(cache.stats().failures(), 1);
    cache.close().unwrap();
}
