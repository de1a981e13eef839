//! In-process cache tier backed by moka.
//!
//! Bounded by entry count with TinyLFU admission. Expiry is not delegated
//! to moka: every entry carries its own insertion time and TTL, and the
//! two-tier cache checks freshness on read.

use crate::cache::CacheEntry;
use moka::sync::Cache;
use std::sync::Arc;

pub struct LocalTier {
    cache: Cache<String, Arc<CacheEntry>>,
}

impl LocalTier {
    /// Create a local tier holding at most `max_entries` entries
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.cache.get(key)
    }

    pub fn insert(&self, key: String, entry: Arc<CacheEntry>) {
        self.cache.insert(key, entry);
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Approximate number of entries (moka updates counts lazily)
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Arc<CacheEntry> {
        Arc::new(CacheEntry {
            results: Vec::new(),
            inserted_at_ms: 0,
            ttl_ms: 1_000,
        })
    }

    #[test]
    fn insert_and_get() {
        let tier = LocalTier::new(100);
        tier.insert("k".to_string(), entry());
        assert!(tier.get("k").is_some());
    }

    #[test]
    fn miss_returns_none() {
        let tier = LocalTier::new(100);
        assert!(tier.get("nonexistent").is_none());
    }

    #[test]
    fn invalidate_and_clear() {
        let tier = LocalTier::new(100);
        tier.insert("a".to_string(), entry());
        tier.insert("b".to_string(), entry());

        tier.invalidate("a");
        assert!(tier.get("a").is_none());

        tier.clear();
        assert!(tier.get("b").is_none());
    }
}
