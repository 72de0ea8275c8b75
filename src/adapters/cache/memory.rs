//! Memory Cache - Capacity-bounded LRU with TTL
//!
//! Hot-path cache for short-lived results such as real-time quotes.
//! Expiry is lazy (checked on access); capacity is enforced on every
//! insert by evicting in strict least-recently-used order.
//!
//! Recency is a monotonically increasing tick per entry, indexed in a
//! `BTreeMap` so the oldest entry is always the first key. Map and
//! index share one lock.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Default capacity.
pub const DEFAULT_MAX_SIZE: usize = 2000;

/// Default time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Cache counters as exposed in health reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 when nothing was looked up.
    pub hit_rate: f64,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    tick: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
}

impl<V> Inner<V> {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }
}

/// Thread-safe LRU cache with per-entry TTL.
#[derive(Debug)]
pub struct MemoryCache<V> {
    max_size: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> MemoryCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size,
            default_ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up `key`, refreshing its recency on a hit.
    ///
    /// An expired entry is removed and counted as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => now > entry.expires_at,
        };
        if expired {
            inner.remove(key);
            inner.misses += 1;
            return None;
        }

        let tick = inner.bump();
        let inner = &mut *inner;
        let entry = inner.entries.get_mut(key)?;
        inner.recency.remove(&entry.tick);
        entry.tick = tick;
        inner.recency.insert(tick, key.to_string());
        inner.hits += 1;
        Some(entry.value.clone())
    }

    /// Insert or replace `key`. `ttl` falls back to the default.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.set_at(key, value, ttl, Instant::now());
    }

    pub fn set_at(&self, key: &str, value: V, ttl: Option<Duration>, now: Instant) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut inner = self.inner.lock();

        inner.remove(key);
        let tick = inner.bump();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                tick,
            },
        );
        inner.recency.insert(tick, key.to_string());

        while inner.entries.len() > self.max_size {
            let Some((_, oldest)) = inner.recency.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Eagerly drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| now > e.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = inner.hits as f64 / lookups.max(1) as f64;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
        }
    }
}

impl<V: Clone> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss_counting() {
        let cache = MemoryCache::new(10, Duration::from_secs(30));
        assert_eq!(cache.get("a"), None::<i32>);
        cache.set("a", 1, None);
        assert_eq!(cache.get("a"), Some(1));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expired_entry_is_removed_on_access() {
        let cache = MemoryCache::new(10, Duration::from_secs(30));
        let t0 = Instant::now();
        cache.set_at("k", "v", Some(Duration::from_secs(1)), t0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("k", t0 + Duration::from_millis(1001)), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_entry_alive_exactly_at_deadline() {
        let cache = MemoryCache::new(10, Duration::from_secs(30));
        let t0 = Instant::now();
        cache.set_at("k", 7, Some(Duration::from_secs(1)), t0);
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(1)), Some(7));
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = MemoryCache::new(2, Duration::from_secs(30));
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("c", 3, None);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = MemoryCache::new(2, Duration::from_secs(30));
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3, None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_set_existing_key_refreshes_position() {
        let cache = MemoryCache::new(2, Duration::from_secs(30));
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("a", 10, None);
        cache.set("c", 3, None);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_resets_counters() {
        let cache = MemoryCache::new(4, Duration::from_secs(30));
        cache.set("a", 1, None);
        cache.get("a");
        cache.get("z");
        cache.clear();
        let stats = cache.stats();
        assert_eq!((stats.size, stats.hits, stats.misses), (0, 0, 0));
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_invalidate_and_purge() {
        let cache = MemoryCache::new(4, Duration::from_secs(30));
        cache.set("a", 1, None);
        cache.set("b", 2, Some(Duration::ZERO));
        cache.invalidate("a");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }
}
