//! Persistent key-value storage for detection results
//!
//! Values are JSON. [`FileKvStore`] keeps the whole map in one file that is
//! rewritten atomically under an advisory lock, so several processes can
//! share a cache file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use serde_json::Value;
use tokio::sync::Mutex;

use crosspost_core::prelude::*;

const CACHE_FILENAME: &str = "cache.json";

/// Durable storage used by the result cache
#[trait_variant::make(KvStore: Send)]
pub trait LocalKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Non-durable store for tests and `--no-cache` style runs
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// JSON-file store shared across processes
#[derive(Debug, Clone)]
pub struct FileKvStore {
    path: PathBuf,
    /// Serialises writers within this process; the file lock covers others
    guard: Arc<Mutex<()>>,
}

impl FileKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// `<data_local_dir>/crosspost/cache.json`
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::data_local_dir()
            .ok_or_else(|| Error::store("Could not determine local data directory"))?;
        Ok(base.join("crosspost").join(CACHE_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_map<T, F>(&self, mutate: bool, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut BTreeMap<String, Value>) -> T + Send + 'static,
    {
        let _guard = self.guard.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || locked_update(&path, mutate, f))
            .await
            .map_err(|e| Error::store(format!("Store task failed: {e}")))?
    }
}

impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.with_map(false, move |map| map.get(&key).cloned()).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        self.with_map(true, move |map| {
            map.insert(key, value);
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_map(true, move |map| {
            map.remove(&key);
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.with_map(false, |map| map.keys().cloned().collect())
            .await
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Read the map under an exclusive lock, apply `f`, and write it back when
/// `mutate` is set
fn locked_update<T>(
    path: &Path,
    mutate: bool,
    f: impl FnOnce(&mut BTreeMap<String, Value>) -> T,
) -> Result<T> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::store(format!("Failed to create {}: {}", parent.display(), e)))?;
    }

    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(path))
        .map_err(|e| Error::store(format!("Failed to open store lock: {}", e)))?;
    lock_file
        .lock_exclusive()
        .map_err(|e| Error::store(format!("Failed to lock store: {}", e)))?;

    let mut map = read_map(path);
    let out = f(&mut map);

    if mutate {
        write_map(path, &map)?;
    }

    // Lock is released when lock_file is dropped
    Ok(out)
}

fn read_map(path: &Path) -> BTreeMap<String, Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!("Failed to read store {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(map) => map,
        Err(e) => {
            warn!("Store {} is corrupt, starting empty: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

fn write_map(path: &Path, map: &BTreeMap<String, Value>) -> Result<()> {
    let content = serde_json::to_string_pretty(map)?;
    let mut temp = path.as_os_str().to_os_string();
    temp.push(".tmp");
    let temp_path = PathBuf::from(temp);

    std::fs::write(&temp_path, content)
        .map_err(|e| Error::store(format!("Failed to write temp file: {}", e)))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| Error::store(format!("Failed to rename temp file: {}", e)))?;
    trace!("Wrote {} entries to {}", map.len(), path.display());
    Ok(())
}
