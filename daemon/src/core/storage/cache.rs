// Write-set and read-cache types used by the state store.
//
// A WriteSet is one staging scope: insertion-ordered so fingerprinting and
// the write log see mutations in the order they happened, with `None`
// entries acting as tombstones for deletes.

use indexmap::IndexMap;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Default number of entries in the durable-read LRU cache.
pub const DEFAULT_READ_CACHE_SIZE: usize = 4096;

/// One staging scope of writes. `None` marks a pending delete.
#[derive(Debug, Default, Clone)]
pub struct WriteSet {
    entries: IndexMap<String, Option<Value>>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), Some(value));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.entries.insert(key.into(), None);
    }

    /// Staged entry for a key, if any. The outer Option distinguishes
    /// "not staged here" from "staged as deleted".
    pub fn get(&self, key: &str) -> Option<&Option<Value>> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Fold another write set into this one, preserving the other's order
    /// for keys it touches.
    pub fn merge(&mut self, other: WriteSet) {
        for (key, value) in other.entries {
            self.entries.insert(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<Value>)> {
        self.entries.iter()
    }

    pub fn drain(&mut self) -> IndexMap<String, Option<Value>> {
        std::mem::take(&mut self.entries)
    }
}

/// LRU cache over durable reads. Holds `None` for keys known to be absent
/// so repeated misses stay cheap. Values are cloned out on every hit: a
/// caller can never mutate the cached copy.
#[derive(Debug)]
pub struct ReadCache {
    cache: Mutex<LruCache<String, Option<Value>>>,
}

impl ReadCache {
    pub fn new(size: usize) -> Self {
        let size = NonZeroUsize::new(size.max(1)).expect("non-zero cache size");
        Self {
            cache: Mutex::new(LruCache::new(size)),
        }
    }

    /// The outer Option distinguishes "not cached" from "cached as absent".
    pub fn get(&self, key: &str) -> Option<Option<Value>> {
        let mut cache = self.cache.lock().ok()?;
        cache.get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: Option<Value>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key.into(), value);
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}
