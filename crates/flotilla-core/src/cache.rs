//! Persisted key-value cache
//!
//! Plugins keep small JSON documents between runs (fingerprint state, for
//! one). Writes are buffered in memory and only reach disk on `save()`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::CacheError;

/// File name of the cache document inside the cache directory
pub const CACHE_FILE: &str = "cache.json";

/// Get/set/save contract for persisted plugin state
pub trait KeyValueCache: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Stage a value for the next save
    fn set(&self, key: &str, value: Value) -> Result<(), CacheError>;

    /// Persist staged values
    fn save(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Default)]
struct FileCacheState {
    loaded: bool,
    entries: BTreeMap<String, Value>,
}

/// Cache stored as one JSON document on disk
#[derive(Debug)]
pub struct FileCache {
    /// Cache directory
    cache_dir: PathBuf,
    state: Mutex<FileCacheState>,
}

impl FileCache {
    /// Create a new file cache
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            state: Mutex::new(FileCacheState::default()),
        }
    }

    /// Create cache with default directory
    pub fn default_dir(root: &Path) -> Self {
        Self::new(root.join(".flotilla").join("cache"))
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn file_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    /// Lock the state, loading the document from disk on first use
    fn loaded(&self) -> Result<MutexGuard<'_, FileCacheState>, CacheError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.loaded {
            let path = self.file_path();
            if path.exists() {
                let contents = fs::read_to_string(&path)?;
                state.entries = serde_json::from_str(&contents)?;
                debug!(path = %path.display(), entries = state.entries.len(), "cache loaded");
            } else {
                debug!(path = %path.display(), "cache miss, starting empty");
            }
            state.loaded = true;
        }
        Ok(state)
    }

    /// Get cache statistics
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        let path = self.file_path();
        if !path.exists() {
            return Ok(stats);
        }

        stats.total_size = fs::metadata(&path)?.len();
        let contents = fs::read_to_string(&path)?;
        let entries: BTreeMap<String, Value> = serde_json::from_str(&contents)?;
        stats.entries = entries.len();
        stats.keys = entries.into_keys().collect();
        Ok(stats)
    }

    /// Remove the cache directory and forget in-memory state
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = FileCacheState::default();
        info!(dir = %self.cache_dir.display(), "cache cleared");
        Ok(())
    }
}

impl KeyValueCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.loaded()?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.loaded()?.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn save(&self) -> Result<(), CacheError> {
        let state = self.loaded()?;
        fs::create_dir_all(&self.cache_dir)?;
        let json = serde_json::to_string_pretty(&state.entries)?;
        let path = self.file_path();

        // Replace the document atomically: write beside it, then rename over it
        let mut temp = NamedTempFile::new_in(&self.cache_dir)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;
        debug!(path = %path.display(), entries = state.entries.len(), "cache saved");
        Ok(())
    }
}

/// In-process cache; values survive only as long as the value itself
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<BTreeMap<String, Value>>,
    saves: Mutex<Vec<BTreeMap<String, Value>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots taken at each `save()`, oldest first
    pub fn saved_snapshots(&self) -> Vec<BTreeMap<String, Value>> {
        self.saves.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn save(&self) -> Result<(), CacheError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone();
        self.saves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entries);
        Ok(())
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache entries
    pub entries: usize,
    /// Total size in bytes
    pub total_size: u64,
    /// Stored keys
    pub keys: Vec<String>,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        if self.total_size < 1024 {
            format!("{} B", self.total_size)
        } else if self.total_size < 1024 * 1024 {
            format!("{:.1} KB", self.total_size as f64 / 1024.0)
        } else {
            format!("{:.1} MB", self.total_size as f64 / (1024.0 * 1024.0))
        }
    }
}
