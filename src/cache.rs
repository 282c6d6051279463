// src/cache.rs
//! Per-channel result cache. Memory only; one coarse lock, entries are small and the
//! number of keys is bounded by the number of channels ever queried.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::models::Item;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub source_id: String,
    pub items: Vec<Item>,
    pub updated_at: Instant,
}

impl CacheEntry {
    pub fn age(&self) -> Duration {
        self.updated_at.elapsed()
    }

    /// Fresh while strictly younger than `ttl`; a zero TTL is never fresh.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

#[derive(Debug, Default)]
pub struct AggregationCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source_id: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .expect("cache lock poisoned")
            .get(source_id)
            .cloned()
    }

    /// Insert or replace the entry for `source_id`, stamped now.
    pub fn put(&self, source_id: &str, items: Vec<Item>) {
        let entry = CacheEntry {
            source_id: source_id.to_string(),
            items,
            updated_at: Instant::now(),
        };
        self.entries
            .write()
            .expect("cache lock poisoned")
            .insert(source_id.to_string(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item_at;

    #[test]
    fn put_overwrites_and_get_clones() {
        let c = AggregationCache::new();
        assert!(c.get("1").is_none());
        c.put("1", vec![item_at("a", 1)]);
        c.put("1", vec![item_at("b", 2), item_at("c", 3)]);
        let e = c.get("1").unwrap();
        assert_eq!(e.source_id, "1");
        assert_eq!(e.items.len(), 2);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn freshness_is_strict() {
        let c = AggregationCache::new();
        c.put("1", vec![]);
        let e = c.get("1").unwrap();
        assert!(e.is_fresh(Duration::from_secs(300)));
        assert!(!e.is_fresh(Duration::ZERO));
    }
}
