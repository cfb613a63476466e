//! On-disk transform metadata cache
//!
//! Persists the most recent successful transform and docblock extraction per
//! file, keyed by `(absolute path, field, transform-options hash)`. Entries
//! are validated against the file's modified time when the cache loads;
//! stale entries are dropped. Writes are debounced so bursts of updates
//! produce a single disk write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const WRITE_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    /// Modified time of the source file when the entry was written, in ms
    mtime_ms: u64,

    /// `field:options-hash` → cached value
    fields: HashMap<String, serde_json::Value>,
}

/// The persistent metadata cache
pub struct MetaCache {
    /// Cache file location; `None` disables persistence
    path: Option<PathBuf>,
    state: Mutex<HashMap<String, FileEntry>>,
    writer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MetaCache {
    /// Load the cache from `dir/metadata.json`, dropping stale entries
    pub fn load(dir: &Path, enabled: bool) -> Arc<Self> {
        let path = enabled.then(|| dir.join("metadata.json"));

        let mut state: HashMap<String, FileEntry> = path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();

        state.retain(|file, entry| match file_mtime_ms(Path::new(file)) {
            Some(mtime) if mtime == entry.mtime_ms => true,
            _ => {
                debug!(file, "dropping stale cache entry");
                false
            }
        });

        Arc::new(Self {
            path,
            state: Mutex::new(state),
            writer: Mutex::new(None),
        })
    }

    /// An in-memory cache that never touches the disk
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            path: None,
            state: Mutex::new(HashMap::new()),
            writer: Mutex::new(None),
        })
    }

    /// Look up a cached value for `(path, field, options hash)`
    pub fn get(&self, path: &Path, field: &str, options_hash: &str) -> Option<serde_json::Value> {
        let key = path.display().to_string();
        let field_key = format!("{}:{}", field, options_hash);
        self.state
            .lock()
            .get(&key)
            .and_then(|entry| entry.fields.get(&field_key))
            .cloned()
    }

    /// Store a value and schedule a debounced write
    pub fn set(
        self: &Arc<Self>,
        path: &Path,
        field: &str,
        options_hash: &str,
        value: serde_json::Value,
    ) {
        let Some(mtime_ms) = file_mtime_ms(path) else {
            return;
        };
        let key = path.display().to_string();
        let field_key = format!("{}:{}", field, options_hash);

        {
            let mut state = self.state.lock();
            let entry = state.entry(key).or_insert_with(|| FileEntry {
                mtime_ms,
                fields: HashMap::new(),
            });
            if entry.mtime_ms != mtime_ms {
                // The file changed since older fields were recorded.
                entry.fields.clear();
                entry.mtime_ms = mtime_ms;
            }
            entry.fields.insert(field_key, value);
        }

        self.schedule_write();
    }

    /// Drop all entries for a path (change or delete event)
    pub fn invalidate(self: &Arc<Self>, path: &Path) {
        let key = path.display().to_string();
        if self.state.lock().remove(&key).is_some() {
            self.schedule_write();
        }
    }

    fn schedule_write(self: &Arc<Self>) {
        if self.path.is_none() {
            return;
        }
        let mut writer = self.writer.lock();
        if let Some(handle) = writer.take() {
            handle.abort();
        }
        let cache = Arc::clone(self);
        *writer = Some(tokio::spawn(async move {
            tokio::time::sleep(WRITE_DEBOUNCE).await;
            cache.persist();
        }));
    }

    /// Write the cache to disk immediately
    pub fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let serialized = {
            let state = self.state.lock();
            serde_json::to_string_pretty(&*state)
        };
        let serialized = match serialized {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to serialize metadata cache: {}", e);
                return;
            }
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, serialized) {
            warn!(path = %path.display(), "failed to write metadata cache: {}", e);
        }
    }
}

fn file_mtime_ms(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
}
