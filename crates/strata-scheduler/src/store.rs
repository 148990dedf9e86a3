//! Storage of the cache keys recorded by successful operations.

use crate::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Remembers the cache key each operation last succeeded with.
pub trait FingerprintStore: Send + Sync {
    /// The key recorded for `operation`.
    fn get(&self, operation: &str) -> Option<String>;

    /// Record the key of a successful execution.
    ///
    /// # Errors
    /// Returns an error if the key cannot be stored.
    fn record(&self, operation: &str, key: &str) -> Result<()>;

    /// Forget `operation`, forcing its next execution.
    ///
    /// # Errors
    /// Returns an error if the store cannot be updated.
    fn invalidate(&self, operation: &str) -> Result<()>;

    /// Persist pending changes.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn lock(entries: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryFingerprintStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn get(&self, operation: &str) -> Option<String> {
        lock(&self.entries).get(operation).cloned()
    }

    fn record(&self, operation: &str, key: &str) -> Result<()> {
        lock(&self.entries).insert(operation.to_owned(), key.to_owned());
        Ok(())
    }

    fn invalidate(&self, operation: &str) -> Result<()> {
        lock(&self.entries).remove(operation);
        Ok(())
    }
}

/// Store persisted as a JSON object of operation name to key.
#[derive(Debug)]
pub struct JsonFingerprintStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFingerprintStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "opened fingerprint store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// File backing the store.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FingerprintStore for JsonFingerprintStore {
    fn get(&self, operation: &str) -> Option<String> {
        lock(&self.entries).get(operation).cloned()
    }

    fn record(&self, operation: &str, key: &str) -> Result<()> {
        lock(&self.entries).insert(operation.to_owned(), key.to_owned());
        Ok(())
    }

    fn invalidate(&self, operation: &str) -> Result<()> {
        lock(&self.entries).remove(operation);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&*lock(&self.entries))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, contents)?;
        debug!(path = %self.path.display(), "flushed fingerprint store");
        Ok(())
    }
}
