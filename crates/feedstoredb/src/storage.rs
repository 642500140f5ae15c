//! Storage engine implementation
//!
//! File layout:
//! - `feed.store`: the committed record (see [`crate::codec`])
//! - `feed.store.tmp`: scratch file for an in-flight replace
//!
//! A replace writes the scratch file, syncs it, then renames it over
//! `feed.store`. The rename is the commit point, so a failed replace never
//! exposes a half-written record. Once the rename (or the removal, for a
//! delete) has happened the call reports success; a failed directory sync
//! after that point is only logged.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::codec::{decode_record, encode_record, MAX_RECORD_SIZE};
use crate::error::{Error, Result};
use crate::memory::MemoryStorage;
use crate::model::CacheRecord;

const DATA_FILE: &str = "feed.store";
const TEMP_FILE: &str = "feed.store.tmp";

/// Durable backing for a single-slot cache
///
/// Each call is a blocking, all-or-nothing unit at the engine level.
/// Implementations are driven from exactly one thread at a time.
pub trait Storage: Send + 'static {
    /// Read the slot. Returns `Ok(None)` when it is empty.
    fn fetch_one(&mut self) -> Result<Option<CacheRecord>>;

    /// Replace whatever the slot holds with `record`.
    fn replace_one(&mut self, record: &CacheRecord) -> Result<()>;

    /// Empty the slot. Succeeds if it is already empty.
    fn delete_one(&mut self) -> Result<()>;

    /// Whether a failed `replace_one` is guaranteed to leave the prior
    /// record untouched. Callers roll back manually when this is `false`.
    ///
    /// Manual rollback is itself a storage write. If it fails too, the slot
    /// keeps whatever the failed replace left behind and only the replace
    /// error reaches the caller; the rollback error is logged.
    fn is_transactional(&self) -> bool {
        true
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn fetch_one(&mut self) -> Result<Option<CacheRecord>> {
        (**self).fetch_one()
    }

    fn replace_one(&mut self, record: &CacheRecord) -> Result<()> {
        (**self).replace_one(record)
    }

    fn delete_one(&mut self) -> Result<()> {
        (**self).delete_one()
    }

    fn is_transactional(&self) -> bool {
        (**self).is_transactional()
    }
}

/// Where a store keeps its record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Directory holding the store files
    Path(PathBuf),
    /// Process-local memory; nothing survives a restart
    InMemory,
}

impl StoreLocation {
    /// Location backed by the given directory
    pub fn path<P: AsRef<Path>>(path: P) -> Self {
        StoreLocation::Path(path.as_ref().to_path_buf())
    }
}

/// Open the storage engine for a location
pub fn open_storage(location: &StoreLocation) -> Result<Box<dyn Storage>> {
    match location {
        StoreLocation::Path(path) => Ok(Box::new(FileStorage::open(path)?)),
        StoreLocation::InMemory => Ok(Box::new(MemoryStorage::new())),
    }
}

/// File-backed single-slot storage
pub struct FileStorage {
    /// Path to the store directory
    path: PathBuf,

    /// Is the storage closed?
    closed: bool,

    #[cfg(test)]
    fail_dir_sync: bool,
}

impl FileStorage {
    /// Open or create a store at the given directory
    ///
    /// # Arguments
    /// * `path` - Directory path for the store files
    ///
    /// # Returns
    /// * `Result<FileStorage>` - Storage handle
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        // Leftover from a replace that never reached its rename.
        let temp_path = path.join(TEMP_FILE);
        if temp_path.exists() {
            warn!("Removing stale scratch file {:?}", temp_path);
            fs::remove_file(&temp_path)?;
        }

        Ok(FileStorage {
            path: path.to_path_buf(),
            closed: false,
            #[cfg(test)]
            fail_dir_sync: false,
        })
    }

    /// Directory this storage lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.path.join(TEMP_FILE)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn sync_dir(&self) -> Result<()> {
        #[cfg(test)]
        if self.fail_dir_sync {
            return Err(io::Error::new(io::ErrorKind::Other, "directory sync failed").into());
        }

        // Directories cannot be opened for syncing on Windows.
        #[cfg(unix)]
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// Sync the directory after a rename or removal has committed.
    fn sync_committed(&self, op: &str) {
        if let Err(e) = self.sync_dir() {
            warn!("Directory sync after {} failed, change is committed: {}", op, e);
        }
    }

    fn write_temp(&self, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.temp_path())?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Close the storage and fsync the directory
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.sync_dir()?;
        self.closed = true;

        Ok(())
    }
}

impl Storage for FileStorage {
    fn fetch_one(&mut self) -> Result<Option<CacheRecord>> {
        self.check_open()?;

        let mut file = match File::open(self.data_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Nothing larger than this was ever written by `replace_one`.
        let len = file.metadata()?.len();
        if len > MAX_RECORD_SIZE as u64 {
            return Err(Error::Corrupt(format!("data file too large: {} bytes", len)));
        }

        let mut bytes = Vec::with_capacity(len as usize);
        file.read_to_end(&mut bytes)?;

        decode_record(&bytes).map(Some)
    }

    fn replace_one(&mut self, record: &CacheRecord) -> Result<()> {
        self.check_open()?;

        let bytes = encode_record(record)?;

        if let Err(e) = self.write_temp(&bytes) {
            let _ = fs::remove_file(self.temp_path());
            return Err(e);
        }

        if let Err(e) = fs::rename(self.temp_path(), self.data_path()) {
            let _ = fs::remove_file(self.temp_path());
            return Err(e.into());
        }

        self.sync_committed("replace");
        Ok(())
    }

    fn delete_one(&mut self) -> Result<()> {
        self.check_open()?;

        match fs::remove_file(self.data_path()) {
            Ok(()) => {
                self.sync_committed("delete");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
