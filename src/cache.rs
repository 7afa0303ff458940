//! `ResultCache` — a bounded key/value store with LRU eviction and TTL
//! expiry, used by the strategies to avoid redundant provider calls.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::model::CacheEntry;

/// Running counters for a [`ResultCache`].
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub memory_bytes_estimate: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Configuration for a [`ResultCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub default_ttl_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024,
            default_ttl_ms: 300_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Bounded LRU + TTL cache. All bookkeeping sits behind a single
/// `RwLock<HashMap<..>>`; callers never hold the lock across a provider call
/// because all methods here are self-contained and return immediately.
pub struct ResultCache {
    config: CacheConfig,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    stats: Arc<RwLock<CacheStats>>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Inserts `value` under `key`. If the cache is at `max_entries` or
    /// would exceed `max_bytes`, evicts the least-recently-accessed entry
    /// (or entries) first.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl_ms: Option<u64>) {
        let key = key.into();
        let approx_bytes = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        let now = Self::now_ms();
        let ttl_ms = ttl_ms.unwrap_or(self.config.default_ttl_ms);

        let mut entries = self.entries.write().await;
        entries.remove(&key);

        while entries.len() >= self.config.max_entries
            || Self::total_bytes(&entries) + approx_bytes > self.config.max_bytes
        {
            if !Self::evict_lru(&mut entries) {
                break;
            }
            self.stats.write().await.evictions += 1;
        }

        entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                inserted_at_ms: now,
                last_accessed_ms: now,
                access_count: 0,
                ttl_ms,
                approx_bytes,
            },
        );
        self.stats.write().await.memory_bytes_estimate = Self::total_bytes(&entries);
    }

    fn total_bytes(entries: &HashMap<String, CacheEntry>) -> usize {
        entries.values().map(|e| e.approx_bytes).sum()
    }

    fn evict_lru(entries: &mut HashMap<String, CacheEntry>) -> bool {
        let victim = entries
            .values()
            .min_by_key(|e| e.last_accessed_ms)
            .map(|e| e.key.clone());
        match victim {
            Some(key) => {
                entries.remove(&key);
                true
            }
            None => false,
        }
    }

    fn is_expired(entry: &CacheEntry, now: i64) -> bool {
        now - entry.inserted_at_ms >= entry.ttl_ms as i64
    }

    /// Returns the cached value for `key`, or `None` if absent or expired.
    /// An expired entry is removed as a side effect of the lookup.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Self::now_ms();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !Self::is_expired(entry, now) => {}
                Some(_) => {
                    drop(entries);
                    self.entries.write().await.remove(key);
                    self.stats.write().await.misses += 1;
                    return None;
                }
                None => {
                    self.stats.write().await.misses += 1;
                    return None;
                }
            }
        }
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.last_accessed_ms = now;
            entry.access_count += 1;
            let value = entry.value.clone();
            drop(entries);
            self.stats.write().await.hits += 1;
            Some(value)
        } else {
            self.stats.write().await.misses += 1;
            None
        }
    }

    pub async fn has(&self, key: &str) -> bool {
        let now = Self::now_ms();
        let entries = self.entries.read().await;
        matches!(entries.get(key), Some(e) if !Self::is_expired(e, now))
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        *self.stats.write().await = CacheStats::default();
    }

    /// Sweeps expired entries. Intended to be called on `cleanup_interval_ms`
    /// by [`ResultCache::spawn_background_cleanup`].
    pub async fn cleanup(&self) -> usize {
        let now = Self::now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !Self::is_expired(entry, now));
        let removed = before - entries.len();
        self.stats.write().await.memory_bytes_estimate = Self::total_bytes(&entries);
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    /// Spawns a background task that calls [`ResultCache::cleanup`] on
    /// `cleanup_interval_ms`, returning a handle the caller can abort.
    pub fn spawn_background_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = Duration::from_millis(cache.config.cleanup_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = cache.cleanup().await;
                if removed > 0 {
                    tracing::debug!(removed, "cache cleanup swept expired entries");
                }
            }
        })
    }
}

/// Derives a stable cache key from a strategy name, a query text, a set of
/// file hashes (order-independent), and an options blob. File hash order
/// never affects the resulting key.
pub fn derive_cache_key(
    strategy_name: &str,
    file_hashes: &[String],
    query_text: &str,
    options: &serde_json::Value,
) -> String {
    let mut sorted_hashes = file_hashes.to_vec();
    sorted_hashes.sort();

    let mut hasher = Sha256::new();
    hasher.update(strategy_name.as_bytes());
    hasher.update(b"\0");
    for h in &sorted_hashes {
        hasher.update(h.as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"\0");
    hasher.update(query_text.as_bytes());
    hasher.update(b"\0");
    hasher.update(
        serde_json::to_vec(options)
            .unwrap_or_default()
            .as_slice(),
    );
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = ResultCache::new(CacheConfig::default());
        cache.set("k", json!({"a": 1}), None).await;
        assert_eq!(cache.get("k").await, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn set_twice_returns_latest_value() {
        let cache = ResultCache::new(CacheConfig::default());
        cache.set("k", json!(1), None).await;
        cache.set("k", json!(2), None).await;
        assert_eq!(cache.get("k").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let cache = ResultCache::new(CacheConfig::default());
        assert_eq!(cache.get("absent").await, None);
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_absent_and_removed() {
        let cache = ResultCache::new(CacheConfig {
            default_ttl_ms: 0,
            ..CacheConfig::default()
        });
        cache.set("k", json!(1), Some(0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn eviction_keeps_size_at_or_under_max_entries() {
        let cache = ResultCache::new(CacheConfig {
            max_entries: 3,
            ..CacheConfig::default()
        });
        for i in 0..10 {
            cache.set(format!("k{i}"), json!(i), None).await;
        }
        assert!(cache.len().await <= 3);
    }

    #[tokio::test]
    async fn least_recently_accessed_entry_is_evicted_first() {
        let cache = ResultCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        cache.set("old", json!(1), None).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("newer", json!(2), None).await;
        // Touch "old" so it becomes more-recently-accessed than "newer".
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get("old").await;
        cache.set("newest", json!(3), None).await;
        assert!(cache.has("old").await);
        assert!(!cache.has("newer").await);
    }

    #[tokio::test]
    async fn cleanup_sweeps_expired_entries() {
        let cache = ResultCache::new(CacheConfig::default());
        cache.set("k", json!(1), Some(0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = cache.cleanup().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn cache_key_is_order_independent_over_file_hashes() {
        let opts = json!({"model": "x"});
        let k1 = derive_cache_key("deep", &["a".into(), "b".into()], "q", &opts);
        let k2 = derive_cache_key("deep", &["b".into(), "a".into()], "q", &opts);
        assert_eq!(k1, k2);
    }

    #[test]
    fn cache_key_differs_on_query_text() {
        let opts = json!({});
        let k1 = derive_cache_key("deep", &[], "q1", &opts);
        let k2 = derive_cache_key("deep", &[], "q2", &opts);
        assert_ne!(k1, k2);
    }
}
