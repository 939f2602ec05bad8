//! Cache tiers and the manager that owns them

use super::lru::{CacheStats, QueryCache, SetOptions};
use crate::config::CacheConfig;
use crate::query::{OutputFormat, Query, ResultSet};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Parsed query ASTs keyed by normalized query text
#[derive(Debug)]
pub struct ParsedQueryCache {
    inner: QueryCache<Arc<Query>>,
}

impl ParsedQueryCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: QueryCache::new(max_size, ttl),
        }
    }

    pub fn get_ast(&mut self, query: &str) -> Option<Arc<Query>> {
        self.inner.get(query, None)
    }

    pub fn set_ast(&mut self, query: &str, ast: Arc<Query>) {
        self.inner.set(query, None, ast, SetOptions::default());
    }

    pub fn cache(&mut self) -> &mut QueryCache<Arc<Query>> {
        &mut self.inner
    }
}

impl Default for ParsedQueryCache {
    fn default() -> Self {
        Self::new(500, Duration::from_secs(3600))
    }
}

/// What a cached result depends on besides the query text.
///
/// `dataset` identifies the record set the result was computed from, so
/// engines sharing a cache never see each other's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultKey<'a> {
    pub dataset: u64,
    pub owner: Option<&'a str>,
    pub format: OutputFormat,
}

impl<'a> ResultKey<'a> {
    pub fn new(dataset: u64, owner: Option<&'a str>, format: OutputFormat) -> Self {
        Self {
            dataset,
            owner,
            format,
        }
    }
}

/// Query results keyed by query text, data set, owner and output format
#[derive(Debug)]
pub struct ResultCache {
    inner: QueryCache<ResultSet>,
}

impl ResultCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: QueryCache::new(max_size, ttl),
        }
    }

    fn key_options(key: &ResultKey<'_>) -> Option<String> {
        serde_json::to_string(key).ok()
    }

    pub fn get_result(&mut self, query: &str, key: &ResultKey<'_>) -> Option<ResultSet> {
        let options = Self::key_options(key);
        self.inner.get(query, options.as_deref())
    }

    pub fn set_result(&mut self, query: &str, key: &ResultKey<'_>, result: ResultSet) {
        let options = Self::key_options(key);
        self.inner.set(
            query,
            options.as_deref(),
            result,
            SetOptions {
                owner: key.owner.map(str::to_string),
                ..Default::default()
            },
        );
    }

    /// Drop every result cached for a caller
    pub fn invalidate_owner(&mut self, owner: &str) -> usize {
        self.inner.invalidate_owner(owner)
    }

    pub fn cache(&mut self) -> &mut QueryCache<ResultSet> {
        &mut self.inner
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

/// Combined statistics of both tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub enabled: bool,
    pub parsed: CacheStats,
    pub results: CacheStats,
    pub total_hit_rate: f64,
    pub size_in_bytes: usize,
}

/// Entries removed by [`CacheManager::prune_expired`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub parsed: usize,
    pub results: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns both cache tiers behind a single enable switch.
///
/// Safe to share between tasks. Results are cloned on the way in and out, so
/// callers never see each other's copies.
#[derive(Debug)]
pub struct CacheManager {
    parsed: Mutex<ParsedQueryCache>,
    results: Mutex<ResultCache>,
    enabled: AtomicBool,
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            parsed: Mutex::new(ParsedQueryCache::new(
                config.parsed_max_entries,
                Duration::from_secs(config.parsed_ttl_secs),
            )),
            results: Mutex::new(ResultCache::new(
                config.result_max_entries,
                Duration::from_secs(config.result_ttl_secs),
            )),
            enabled: AtomicBool::new(config.enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turn caching on or off. Disabling clears both tiers.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.clear_all();
        }
        tracing::info!(enabled, "Query cache toggled");
    }

    pub fn get_parsed(&self, query: &str) -> Option<Arc<Query>> {
        if !self.is_enabled() {
            return None;
        }
        lock(&self.parsed).get_ast(query)
    }

    /// Stores are checked against the switch while holding the tier lock, so
    /// nothing lands after [`set_enabled`](Self::set_enabled) has cleared it.
    pub fn set_parsed(&self, query: &str, ast: Arc<Query>) {
        let mut parsed = lock(&self.parsed);
        if self.is_enabled() {
            parsed.set_ast(query, ast);
        }
    }

    /// Cached result for a query, marked `cached`
    pub fn get_result(&self, query: &str, key: &ResultKey<'_>) -> Option<ResultSet> {
        if !self.is_enabled() {
            return None;
        }
        lock(&self.results).get_result(query, key)
    }

    /// Store a copy of a result, marked `cached`
    pub fn set_result(&self, query: &str, key: &ResultKey<'_>, result: &ResultSet) {
        if !self.is_enabled() {
            return;
        }
        let mut stored = result.clone();
        stored.cached = true;

        let mut results = lock(&self.results);
        if self.is_enabled() {
            results.set_result(query, key, stored);
        }
    }

    /// Drop every result cached for a caller
    pub fn invalidate_owner(&self, owner: &str) -> usize {
        lock(&self.results).invalidate_owner(owner)
    }

    pub fn clear_all(&self) {
        lock(&self.parsed).cache().clear();
        lock(&self.results).cache().clear();
    }

    pub fn prune_expired(&self) -> PruneReport {
        PruneReport {
            parsed: lock(&self.parsed).cache().prune_expired(),
            results: lock(&self.results).cache().prune_expired(),
        }
    }

    pub fn statistics(&self) -> CacheStatistics {
        let (parsed, parsed_bytes) = {
            let mut guard = lock(&self.parsed);
            (guard.cache().stats(), guard.cache().size_in_bytes())
        };
        let (results, result_bytes) = {
            let mut guard = lock(&self.results);
            (guard.cache().stats(), guard.cache().size_in_bytes())
        };

        let hits = parsed.hits + results.hits;
        let lookups = hits + parsed.misses + results.misses;
        let total_hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheStatistics {
            enabled: self.is_enabled(),
            parsed,
            results,
            total_hit_rate,
            size_in_bytes: parsed_bytes + result_bytes,
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
