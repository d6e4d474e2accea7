//! Durable client-side key-value storage.
//!
//! Models the browser profile a storefront keeps its cart and token in:
//! synchronous get/set, survives a reload, scoped to one
//! profile, shared by every tab of that profile. Two implementations:
//! [`MemoryStorage`] (tests, ephemeral hosts) and [`FileStorage`] (one
//! JSON object per profile file).
//!
//! Storage failures never propagate: a read that cannot be served is an
//! empty read, a write that cannot land is logged and dropped. The cart
//! engine treats storage as best-effort durable, not transactional.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Well-known storage keys.
pub mod storage_keys {
    /// The guest/local quantity ledger, as a flat JSON object.
    pub const CART_ITEMS: &str = "cart.items";
    /// The raw bearer token issued by the authentication service.
    pub const AUTH_TOKEN: &str = "auth.token";
}

/// Synchronous key-value storage scoped to one browser profile.
///
/// Concurrent tabs share one storage instance; writers race with
/// last-writer-wins semantics (an accepted limitation, reconciled by
/// read-modify-write in the callers).
pub trait KeyValueStorage: Send + Sync {
    /// Read a value. `None` if absent or unreadable.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value through to durable storage immediately.
    fn set(&self, key: &str, value: &str);

    /// Remove a key. Removing an absent key is a no-op.
    fn remove(&self, key: &str);
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// In-process storage.
///
/// Clones share the same underlying map, so two facades built over clones
/// of one `MemoryStorage` behave like two tabs of one browser profile.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Create an empty storage profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

// =============================================================================
// FileStorage
// =============================================================================

/// File-backed storage: the whole profile is one JSON object on disk.
///
/// Every `get` re-reads the file so a second process over the same
/// profile observes foreign writes; every `set`/`remove` rewrites it
/// (write-through, no buffering - a reload never loses state).
#[derive(Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create storage over a profile file. The file is created on first
    /// write; a missing file reads as an empty profile.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> HashMap<String, String> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "storage read failed");
                return HashMap::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "storage file corrupt");
            HashMap::new()
        })
    }

    fn save(&self, entries: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!(path = %self.path.display(), error = %e, "storage dir create failed");
            return;
        }

        match serde_json::to_string_pretty(entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(path = %self.path.display(), error = %e, "storage write failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "storage encode failed");
            }
        }
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.load();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.load();
        if entries.remove(key).is_some() {
            self.save(&entries);
        }
    }
}
