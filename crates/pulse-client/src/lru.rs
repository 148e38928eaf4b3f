//! A bounded, TTL-aware LRU cache used both directly by callers and internally by [`crate::Client`].

use std::time::{Duration, Instant};

use indexmap::IndexMap;

/// Default capacity, matching `cacheMaxSize`'s default in the spec (§6).
pub const DEFAULT_MAX_SIZE: usize = 500;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

/// An ordered, capacity-bounded, optionally time-limited cache.
///
/// Recency is tracked by position in the underlying [`IndexMap`]: the most-recently-touched key
/// is always at the back. `get` promotes on hit; insertion past capacity evicts from the front
/// (the least-recently-used entry), per §4.6.
pub struct LruCache<K, V> {
    entries: IndexMap<K, Entry<V>>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl<K, V> LruCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
{
    /// Creates a new cache with the given capacity and a default time-to-live applied to entries
    /// inserted via [`LruCache::set`] (use [`LruCache::set_with_ttl`] to override per entry).
    /// A `capacity` of `0` means entries are evicted immediately after insertion, effectively
    /// disabling the cache while keeping its API available.
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        LruCache {
            entries: IndexMap::new(),
            capacity,
            default_ttl,
        }
    }

    /// The number of live entries, including ones that are expired but not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts `value` under `key` using the cache's default TTL, evicting the least-recently-used
    /// entry if this insertion would exceed capacity. Re-inserting an existing key moves it to
    /// most-recent without changing its position relative to the eviction order of other keys.
    pub fn set(&mut self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Same as [`LruCache::set`] but with an explicit per-entry TTL (`None` never expires).
    pub fn set_with_ttl(&mut self, key: K, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let entry = Entry {
            value,
            inserted_at: now,
            expires_at: ttl.map(|d| now + d),
        };
        if let Some(index) = self.entries.get_index_of(&key) {
            self.entries[index] = entry;
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
        } else {
            self.entries.insert(key, entry);
            self.evict_if_over_capacity();
        }
    }

    fn evict_if_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            // The least-recently-used entry is always at the front.
            self.entries.shift_remove_index(0);
        }
    }

    /// Looks up `key`, promoting it to most-recent on a hit. Entries past their TTL are treated as
    /// absent and evicted eagerly.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = self.entries.get_index_of(key)?;
        if self.is_expired_at(index) {
            self.entries.shift_remove_index(index);
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get(key).map(|e| &e.value)
    }

    /// Like [`LruCache::get`] but does not promote the entry's recency. Still evicts if expired.
    pub fn peek(&mut self, key: &K) -> Option<&V> {
        let index = self.entries.get_index_of(key)?;
        if self.is_expired_at(index) {
            self.entries.shift_remove_index(index);
            return None;
        }
        self.entries.get(key).map(|e| &e.value)
    }

    /// Returns the age of `key`'s entry, or `None` if the key is absent. Used by the query hook to
    /// implement the `staleTime` freshness policy documented in the spec's Open Questions.
    pub fn age(&self, key: &K) -> Option<Duration> {
        self.entries.get(key).map(|e| e.inserted_at.elapsed())
    }

    fn is_expired_at(&self, index: usize) -> bool {
        match self.entries.get_index(index) {
            Some((_, entry)) => entry
                .expires_at
                .is_some_and(|expires_at| Instant::now() >= expires_at),
            None => false,
        }
    }

    /// Removes `key`, returning its value if present. A no-op (returns `None`) if the key was
    /// never cached.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key).map(|e| e.value)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates keys in recency order, least-recently-used first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Iterates keys in recency order, most-recently-used first. Matches the eviction-order
    /// assertion style used in the spec's LRU scenario (§8 scenario 6).
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &K> {
        self.entries.keys().rev()
    }
}
