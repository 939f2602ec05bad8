//! Query Caches
//!
//! Two-tier caching for the query engine:
//! - Parsed queries keyed by normalized query text
//! - Results keyed by query text, data set, caller and output options
//!
//! Both tiers are [`QueryCache`]s: strict LRU with per-entry TTL.

mod hash;
mod lru;
mod manager;

pub use hash::cache_key;
pub use lru::{CacheStats, QueryCache, SetOptions};
pub use manager::{
    CacheManager, CacheStatistics, ParsedQueryCache, PruneReport, ResultCache, ResultKey,
};

use crate::query::{Query, ResultSet};
use std::sync::Arc;

/// Estimated memory footprint of a cached value
pub trait Weigh {
    fn weight(&self) -> usize;
}

impl Weigh for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weigh for Arc<Query> {
    fn weight(&self) -> usize {
        serde_json::to_string(self.as_ref())
            .map(|json| json.len())
            .unwrap_or(0)
    }
}

/// Fixed overhead plus header text, 50 bytes per row and any CSV rendering
impl Weigh for ResultSet {
    fn weight(&self) -> usize {
        100 + self.headers().concat().len()
            + self.rows().len() * 50
            + self.csv.as_ref().map(String::len).unwrap_or(0)
    }
}
