// =============================================================================
// TTL Cache — opaque key/value store for assembled market states
// =============================================================================
//
// Reads are side-effect free; expired entries are evicted lazily on access.
// Writers populate only on miss (or on an explicit refresh bypass upstream).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// In-memory TTL key/value cache. Values are stored as serialised JSON so the
/// cache stays opaque to what it holds.
pub struct TtlCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    inserted: Instant,
    value: serde_json::Value,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a non-expired value. Never mutates on the read path beyond
    /// nothing at all — expired entries are left for `put`/`purge`.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.inserted.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut entries = self.entries.write();
        entries.insert(
            key.into(),
            CacheEntry {
                inserted: Instant::now(),
                value,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drop every expired entry. Called opportunistically from write paths.
    pub fn purge_expired(&self) {
        let mut entries = self.entries.write();
        entries.retain(|_, e| e.inserted.elapsed() <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
