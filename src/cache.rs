// src/cache.rs
// =============================================================================
// Scan result cache.
//
// Keyed by request identity (host + path), each entry is the ordered list of
// URIs accepted while that response was scanned. A later identical request
// replays the list instead of scanning again.
//
// Entries never expire on their own; whoever owns the cache deletes them.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

/// Minimal cache contract used by the push coordinator.
///
/// Implementations are shared between concurrent requests and must make
/// each call atomic per key.
pub trait Cache: Send + Sync {
    /// The recorded URIs for `key`, or None on a miss.
    fn get(&self, key: &str) -> Option<Vec<String>>;

    /// Appends `uri` to the entry for `key`, creating it on first use.
    fn add(&self, key: &str, uri: &str);

    fn del(&self, key: &str);

    /// Replaces the entry for `key` with `uris`.
    ///
    /// The default goes through `del` and `add`, so a concurrent reader can
    /// see the entry half written; implementations should override it.
    fn replace(&self, key: &str, uris: &[String]) {
        self.del(key);
        for uri in uris {
            self.add(key, uri);
        }
    }
}

/// Process-local cache. Readers share the lock, writers take it alone.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<String>> {
        self.entries.read().get(key).cloned()
    }

    fn add(&self, key: &str, uri: &str) {
        self.entries
            .write()
            .entry(key.to_string())
            .or_default()
            .push(uri.to_string());
    }

    fn del(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn replace(&self, key: &str, uris: &[String]) {
        self.entries.write().insert(key.to_string(), uris.to_vec());
    }
}
