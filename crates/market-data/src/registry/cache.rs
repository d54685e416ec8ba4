//! Generic expiring key/value cache.
//!
//! Used for the per-provider quote cache and the symbol-universe cache.
//! Entries carry their own TTL; a read past the TTL behaves as absent
//! and evicts the entry. No capacity bound - the key space here is
//! small (providers x symbols) and entries age out.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::warn;

/// A cached value with its creation time and time-to-live.
#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    created: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self) -> bool {
        self.created.elapsed() >= self.ttl
    }
}

/// Thread-safe TTL cache.
///
/// Values are cloned out on read, so a reader never observes a
/// partially written value; writers always publish complete snapshots
/// via `put`. Expired entries are removed when a read observes them;
/// `purge_expired` sweeps the rest.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create a cache whose `put` uses the given default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Lock the entries mutex, recovering from poison if necessary.
    ///
    /// A poisoned cache mutex only risks stale or missing entries,
    /// which the TTL contract already allows.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("TTL cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Look up a key.
    ///
    /// Returns `None` for missing keys and for entries whose age
    /// exceeds their TTL; an expired entry is evicted on observation.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock_entries();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Insert or overwrite a value with the default TTL.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite a value with an explicit TTL.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.lock_entries();
        entries.insert(
            key,
            CacheEntry {
                value,
                created: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove a key explicitly.
    pub fn invalidate(&self, key: &K) {
        let mut entries = self.lock_entries();
        entries.remove(key);
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let mut entries = self.lock_entries();
        entries.retain(|_, entry| !entry.is_expired());
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut entries = self.lock_entries();
        entries.clear();
    }

    /// Number of entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }
}
