//! Key-value persistence substrate
//!
//! The cache persists its records through the [`KvStore`] trait: a minimal
//! string-blob store with `get`/`set`/`remove` and a finite capacity. A full
//! substrate reports [`PalaverError::QuotaExceeded`] from `set`, which the
//! cache recovers from by shrinking itself and retrying. There are no
//! transactional guarantees across keys.
//!
//! Two implementations are provided: [`MemoryStore`] for tests and ephemeral
//! sessions, and [`FileStore`] which keeps one JSON file per record under a
//! cache directory.

use crate::error::{PalaverError, PalaverResult};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Key-value persistence backend
///
/// Keys are identifier-like record names chosen by the cache, not arbitrary
/// user data.
pub trait KvStore: Send {
    /// Read a record, `None` if absent
    fn get(&self, key: &str) -> PalaverResult<Option<String>>;

    /// Write a record, failing with [`PalaverError::QuotaExceeded`] when the
    /// substrate is out of capacity
    fn set(&mut self, key: &str, value: &str) -> PalaverResult<()>;

    /// Delete a record; deleting an absent record is not an error
    fn remove(&mut self, key: &str) -> PalaverResult<()>;
}

/// In-memory key-value store
///
/// An optional byte limit makes quota exhaustion reproducible in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<String, String>,
    byte_limit: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes once its total size (keys plus
    /// values) would exceed `limit` bytes
    pub fn with_byte_limit(limit: usize) -> Self {
        Self {
            records: HashMap::new(),
            byte_limit: Some(limit),
        }
    }

    fn projected_size(&self, key: &str, value: &str) -> usize {
        let others: usize = self
            .records
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum();
        others + key.len() + value.len()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> PalaverResult<Option<String>> {
        Ok(self.records.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> PalaverResult<()> {
        if let Some(limit) = self.byte_limit {
            if self.projected_size(key, value) > limit {
                return Err(PalaverError::QuotaExceeded);
            }
        }
        self.records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> PalaverResult<()> {
        self.records.remove(key);
        Ok(())
    }
}

/// File-backed key-value store
///
/// Each record is a `<key>.json` file under the base directory. Capacity is
/// checked against the directory's total record size before writing, and an
/// out-of-space error from the filesystem maps to the same quota condition.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
    capacity: Option<u64>,
}

impl FileStore {
    /// Create a file store rooted at `base_dir`, creating the directory if
    /// needed
    pub fn new(base_dir: impl AsRef<Path>) -> PalaverResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .map_err(|e| PalaverError::storage(format!("failed to create {:?}: {}", base_dir, e)))?;
        Ok(Self {
            base_dir,
            capacity: None,
        })
    }

    /// Create a file store with a byte capacity across all records
    pub fn with_capacity(base_dir: impl AsRef<Path>, capacity: u64) -> PalaverResult<Self> {
        let mut store = Self::new(base_dir)?;
        store.capacity = Some(capacity);
        Ok(store)
    }

    /// Default per-user cache directory for Palaver records
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("palaver"))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }

    /// Total size of all records except the one about to be rewritten
    fn size_excluding(&self, key: &str) -> u64 {
        let skip = self.record_path(key);
        let Ok(dir) = fs::read_dir(&self.base_dir) else {
            return 0;
        };
        dir.filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != skip)
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> PalaverResult<Option<String>> {
        match fs::read_to_string(self.record_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PalaverError::storage(format!(
                "failed to read record {}: {}",
                key, e
            ))),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> PalaverResult<()> {
        if let Some(capacity) = self.capacity {
            if self.size_excluding(key) + value.len() as u64 > capacity {
                return Err(PalaverError::QuotaExceeded);
            }
        }
        match fs::write(self.record_path(key), value) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::StorageFull || e.kind() == ErrorKind::QuotaExceeded => {
                Err(PalaverError::QuotaExceeded)
            }
            Err(e) => Err(PalaverError::storage(format!(
                "failed to write record {}: {}",
                key, e
            ))),
        }
    }

    fn remove(&mut self, key: &str) -> PalaverResult<()> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PalaverError::storage(format!(
                "failed to remove record {}: {}",
                key, e
            ))),
        }
    }
}
