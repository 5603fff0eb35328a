//! Cache collaborator contract and the in-memory implementation.
//!
//! Keys are `"<data_type>:<SYMBOL>"`, categories are the data type names.
//! Expired entries stay readable through [`CacheStore::get_stale`] so the
//! recovery path can serve the last known value.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;

use crate::clock::{after, SharedClock, SystemClock};
use crate::models::MarketData;

/// Key/value store with per-entry TTL and a category namespace.
pub trait CacheStore: Send + Sync {
    /// Fresh value for `key`, or `None` when missing or expired.
    fn get(&self, key: &str, category: &str) -> Option<MarketData>;

    /// Store `value` for `ttl`.
    fn set(&self, key: &str, value: MarketData, category: &str, ttl: Duration);

    /// Most recent value for `key` regardless of expiry.
    fn get_stale(&self, key: &str, category: &str) -> Option<MarketData>;

    fn invalidate(&self, key: &str, category: &str);
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: MarketData,
    expires_at: DateTime<Utc>,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
}

/// In-memory TTL cache.
pub struct MemoryCache {
    entries: DashMap<(String, String), CacheEntry>,
    clock: SharedClock,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let fresh = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count();
        CacheStats {
            entries: self.entries.len(),
            fresh,
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str, category: &str) -> Option<MarketData> {
        let entry = self.entries.get(&(category.to_string(), key.to_string()))?;
        if entry.expires_at > self.clock.now() {
            Some(entry.value.clone())
        } else {
            debug!("Cache: entry '{}' in '{}' expired", key, category);
            None
        }
    }

    fn set(&self, key: &str, value: MarketData, category: &str, ttl: Duration) {
        let expires_at = after(self.clock.now(), ttl);
        self.entries.insert(
            (category.to_string(), key.to_string()),
            CacheEntry { value, expires_at },
        );
    }

    fn get_stale(&self, key: &str, category: &str) -> Option<MarketData> {
        self.entries
            .get(&(category.to_string(), key.to_string()))
            .map(|entry| entry.value.clone())
    }

    fn invalidate(&self, key: &str, category: &str) {
        self.entries
            .remove(&(category.to_string(), key.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{DataType, Payload, Quote};
    use rust_decimal_macros::dec;

    fn sample(symbol: &str) -> MarketData {
        MarketData::new(
            symbol,
            DataType::Quote,
            "finnhub",
            Utc::now(),
            Payload::Quote(Quote::new(symbol, dec!(150.25), "finnhub")),
        )
    }

    #[test]
    fn test_round_trip_before_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::with_clock(clock.clone());

        cache.set("quote:AAPL", sample("AAPL"), "quote", Duration::from_secs(60));
        clock.advance(Duration::from_secs(59));

        let hit = cache.get("quote:AAPL", "quote");
        assert_eq!(hit.map(|d| d.symbol), Some("AAPL".to_string()));
    }

    #[test]
    fn test_miss_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::with_clock(clock.clone());

        cache.set("quote:AAPL", sample("AAPL"), "quote", Duration::from_secs(60));
        clock.advance(Duration::from_secs(60));

        assert!(cache.get("quote:AAPL", "quote").is_none());
        // Still reachable for stale serving
        assert!(cache.get_stale("quote:AAPL", "quote").is_some());
    }

    #[test]
    fn test_categories_are_separate() {
        let cache = MemoryCache::new();
        cache.set("AAPL", sample("AAPL"), "quote", Duration::from_secs(60));

        assert!(cache.get("AAPL", "profile").is_none());
        assert!(cache.get("AAPL", "quote").is_some());
    }

    #[test]
    fn test_invalidate_and_stats() {
        let clock = Arc::new(ManualClock::default());
        let cache = MemoryCache::with_clock(clock.clone());
        cache.set("quote:AAPL", sample("AAPL"), "quote", Duration::from_secs(10));
        cache.set("quote:MSFT", sample("MSFT"), "quote", Duration::from_secs(100));
        clock.advance(Duration::from_secs(20));

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.fresh, 1);

        cache.invalidate("quote:MSFT", "quote");
        assert!(cache.get_stale("quote:MSFT", "quote").is_none());
    }
}
