//! Key → entry storage.
//!
//! The store is backend-agnostic; the reference backend keeps one file
//! per key under a configured directory. Same-key `put`s from
//! independent workers are byte-identical under the deterministic-task
//! assumption, so overwrites are not a conflict.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::entry::{CacheKey, PackedEntry};
use crate::{Error, Result};

/// Abstract key → entry storage.
pub trait CacheStore: Send + Sync {
    /// Fetch the entry for a key.
    ///
    /// An absent key is a miss (`Ok(None)`), never an error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend itself fails (e.g. an
    /// unreadable entry file).
    fn get(&self, key: &CacheKey) -> Result<Option<PackedEntry>>;

    /// Store an entry under a key, overwriting any existing entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to persist the entry.
    fn put(&self, key: &CacheKey, entry: &PackedEntry) -> Result<()>;
}

/// Reference backend: one file per key under a configured directory.
#[derive(Debug, Clone)]
pub struct LocalDirectoryStore {
    root: PathBuf,
}

impl LocalDirectoryStore {
    /// Create a store over the given directory. The directory is
    /// created lazily on first `put`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the entry file backing a key.
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

impl CacheStore for LocalDirectoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<PackedEntry>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => {
                tracing::debug!(key = %key, bytes = bytes.len(), "Cache hit");
                Ok(Some(PackedEntry::from_bytes(bytes)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %key, "Cache miss");
                Ok(None)
            }
            Err(e) => Err(Error::io(e, &path, "read")),
        }
    }

    fn put(&self, key: &CacheKey, entry: &PackedEntry) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root, "create_dir_all"))?;
        let path = self.entry_path(key);

        // Build the full entry under a temporary name, then publish it
        // with an atomic rename: a partial put is never visible under
        // the key, even if the build is aborted mid-write.
        let tmp = self.root.join(format!("{}.tmp", key.as_str()));
        let mut file = fs::File::create(&tmp).map_err(|e| Error::io(e, &tmp, "create"))?;
        file.write_all(entry.bytes())
            .map_err(|e| Error::io(e, &tmp, "write"))?;
        file.sync_all().map_err(|e| Error::io(e, &tmp, "sync"))?;
        drop(file);
        fs::rename(&tmp, &path).map_err(|e| Error::io(e, &path, "rename"))?;

        tracing::debug!(key = %key, bytes = entry.len(), "Stored cache entry");
        Ok(())
    }
}
