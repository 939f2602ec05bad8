//! Generic LRU cache with per-entry TTL
//!
//! Recency is tracked with a monotonically increasing access tick. Each entry
//! remembers its last tick and a `BTreeMap` orders ticks, so the least
//! recently used key is always the first entry of that map.

use super::hash::cache_key;
use super::Weigh;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Per-insertion options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// Overrides the cache's default TTL
    pub ttl: Option<Duration>,
    /// Overrides the value's own size estimate
    pub size: Option<usize>,
    /// Caller the entry belongs to, for [`QueryCache::invalidate_owner`]
    pub owner: Option<String>,
}

/// Counters for one cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: usize,
}

impl CacheStats {
    /// Hits over lookups, zero before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    inserted: Instant,
    ttl: Duration,
    hits: u64,
    size: usize,
    owner: Option<String>,
    tick: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self) -> bool {
        self.inserted.elapsed() > self.ttl
    }
}

/// LRU cache keyed by a digest of query text and options
#[derive(Debug)]
pub struct QueryCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    recency: BTreeMap<u64, String>,
    tick: u64,
    max_size: usize,
    default_ttl: Duration,
    stats: CacheStats,
}

impl<T: Clone + Weigh> QueryCache<T> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            max_size,
            default_ttl,
            stats: CacheStats {
                max_size,
                ..Default::default()
            },
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    /// Look up a value. Expired entries are removed and count as a miss.
    pub fn get(&mut self, query: &str, options: Option<&str>) -> Option<T> {
        let key = cache_key(query, options);

        let expired = match self.entries.get(&key) {
            None => {
                self.stats.misses += 1;
                tracing::debug!(key = %key, "Cache miss");
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            self.delete(&key);
            self.stats.misses += 1;
            tracing::debug!(key = %key, "Cache entry expired");
            return None;
        }

        self.touch(&key);
        self.stats.hits += 1;
        let entry = self.entries.get_mut(&key)?;
        entry.hits += 1;
        tracing::debug!(key = %key, hits = entry.hits, "Cache hit");
        Some(entry.value.clone())
    }

    /// Insert or replace a value. Inserting a new key into a full cache
    /// evicts the least recently used entry first.
    pub fn set(&mut self, query: &str, options: Option<&str>, value: T, set: SetOptions) {
        if self.max_size == 0 {
            return;
        }

        let key = cache_key(query, options);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        if let Some(old) = self.entries.get(&key) {
            self.recency.remove(&old.tick);
        }

        self.tick += 1;
        let entry = CacheEntry {
            size: set.size.unwrap_or_else(|| value.weight()),
            value,
            inserted: Instant::now(),
            ttl: set.ttl.unwrap_or(self.default_ttl),
            hits: 0,
            owner: set.owner,
            tick: self.tick,
        };
        self.recency.insert(self.tick, key.clone());
        self.entries.insert(key, entry);
        self.stats.size = self.entries.len();
    }

    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
            self.stats.evictions += 1;
            self.stats.size = self.entries.len();
            tracing::debug!(key = %key, "Evicted least recently used entry");
        }
    }

    /// Remove an entry by key. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                self.stats.size = self.entries.len();
                true
            }
            None => false,
        }
    }

    /// Remove every entry. Hit and miss counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.stats.size = 0;
        self.stats.evictions = 0;
    }

    /// Remove expired entries, returning how many were removed
    pub fn prune_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            self.delete(key);
        }
        expired.len()
    }

    /// Remove every entry stored for `owner`, returning how many were removed
    pub fn invalidate_owner(&mut self, owner: &str) -> usize {
        let owned: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owner.as_deref() == Some(owner))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &owned {
            self.delete(key);
        }
        owned.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats.hit_rate()
    }

    /// Estimated size of all entries
    pub fn size_in_bytes(&self) -> usize {
        self.entries.values().map(|e| e.size).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> QueryCache<String> {
        QueryCache::new(max_size, Duration::from_secs(60))
    }

    #[test]
    fn test_set_then_get() {
        let mut cache = cache(10);
        cache.set("q1", None, "v1".to_string(), SetOptions::default());

        assert_eq!(cache.get("q1", None), Some("v1".to_string()));
        assert_eq!(cache.get("q1", None), Some("v1".to_string()));
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.get("q2", None), None);
        assert_eq!(cache.stats().misses, 1);
        assert!((cache.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_options_are_part_of_key() {
        let mut cache = cache(10);
        cache.set("q", Some("a"), "for a".to_string(), SetOptions::default());

        assert_eq!(cache.get("q", Some("a")), Some("for a".to_string()));
        assert_eq!(cache.get("q", None), None);
        assert_eq!(cache.get("q", Some("b")), None);
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let mut cache = cache(3);
        for q in ["a", "b", "c"] {
            cache.set(q, None, q.to_string(), SetOptions::default());
        }

        // "a" becomes most recent, leaving "b" as the victim
        cache.get("a", None);
        cache.set("d", None, "d".to_string(), SetOptions::default());

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.get("b", None), None);
        assert!(cache.get("a", None).is_some());
        assert!(cache.get("c", None).is_some());
        assert!(cache.get("d", None).is_some());
    }

    #[test]
    fn test_update_never_evicts() {
        let mut cache = cache(2);
        cache.set("a", None, "1".to_string(), SetOptions::default());
        cache.set("b", None, "2".to_string(), SetOptions::default());
        cache.set("a", None, "3".to_string(), SetOptions::default());

        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a", None), Some("3".to_string()));
        assert_eq!(cache.get("b", None), Some("2".to_string()));
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let mut cache = cache(10);
        cache.set(
            "q",
            None,
            "v".to_string(),
            SetOptions {
                ttl: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        );
        cache.set("keep", None, "k".to_string(), SetOptions::default());
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(cache.get("q", None), None);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.prune_expired(), 0);
    }

    #[test]
    fn test_prune_expired() {
        let mut cache = cache(10);
        let short = SetOptions {
            ttl: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        cache.set("a", None, "a".to_string(), short.clone());
        cache.set("b", None, "b".to_string(), short);
        cache.set("c", None, "c".to_string(), SetOptions::default());
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.prune_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn test_sizes_and_owners() {
        let mut cache = cache(10);
        let owned = |owner: &str| SetOptions {
            owner: Some(owner.to_string()),
            ..Default::default()
        };
        cache.set("a", Some("u1"), "12345".to_string(), owned("u1"));
        cache.set("b", Some("u1"), "123".to_string(), owned("u1"));
        cache.set(
            "c",
            Some("u2"),
            "x".to_string(),
            SetOptions {
                size: Some(100),
                owner: Some("u2".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(cache.size_in_bytes(), 108);
        assert_eq!(cache.invalidate_owner("u1"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("c", Some("u2")), Some("x".to_string()));
    }

    #[test]
    fn test_delete_and_clear() {
        let mut cache = cache(10);
        cache.set("a", None, "a".to_string(), SetOptions::default());
        cache.set("b", None, "b".to_string(), SetOptions::default());

        assert!(cache.delete(&cache_key("a", None)));
        assert!(!cache.delete(&cache_key("a", None)));
        assert_eq!(cache.len(), 1);

        cache.get("b", None);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().max_size, 10);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = cache(0);
        cache.set("a", None, "a".to_string(), SetOptions::default());
        assert!(cache.is_empty());
    }
}
