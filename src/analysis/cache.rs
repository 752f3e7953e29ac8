//! Bounded TTL cache for per-segment market metrics.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Concurrent key/value cache with time-to-live and a soft capacity bound.
///
/// `get_or_insert_with` holds the key's shard lock while computing, so
/// concurrent callers for the same key compute once. The compute closure
/// must not call back into the same cache.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        entry.inserted_at.elapsed() >= self.ttl
    }

    /// Fresh value for `key`, if any
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if self.is_expired(&entry) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Return the cached value, or compute, store and return it
    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if !self.entries.contains_key(&key) {
            self.make_room();
        }

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if self.is_expired(occupied.get()) {
                    let value = compute();
                    occupied.insert(CacheEntry {
                        value: value.clone(),
                        inserted_at: Instant::now(),
                    });
                    value
                } else {
                    occupied.get().value.clone()
                }
            }
            Entry::Vacant(vacant) => {
                let value = compute();
                vacant.insert(CacheEntry {
                    value: value.clone(),
                    inserted_at: Instant::now(),
                });
                value
            }
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prune expired entries. Returns count removed.
    pub fn prune_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Drop expired entries, then the oldest ones, until a new key fits
    fn make_room(&self) {
        if self.entries.len() < self.capacity {
            return;
        }
        self.prune_expired();

        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
