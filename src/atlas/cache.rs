use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub stored_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Time-bounded response cache. Entries older than the TTL are treated as
/// absent and dropped on read; the LRU bound caps memory between reads.
pub struct TtlCache<V> {
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

struct Inner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Returns a fresh entry's data, evicting it instead if it has gone stale.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        let lookup = inner
            .entries
            .get(key)
            .map(|entry| (entry.stored_at.elapsed() < ttl).then(|| entry.data.clone()));
        match lookup {
            Some(Some(data)) => {
                inner.hits += 1;
                Some(data)
            }
            Some(None) => {
                inner.entries.pop(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Stores `data`, overwriting whatever was under `key`.
    pub fn insert(&self, key: impl Into<String>, data: V) {
        let entry = CacheEntry {
            data,
            stored_at: Instant::now(),
        };
        self.inner.lock().entries.put(key.into(), entry);
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.lock().entries.pop(key).map(|entry| entry.data)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}
