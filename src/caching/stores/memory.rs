//! # In-Memory Cache Store
//!
//! DashMap-backed store with TTL enforcement, a periodic sweep of expired entries
//! and least-recently-accessed eviction once `max_entries` is reached.

use super::{glob_to_regex, CacheEntry, CacheStore};
use crate::caching::CacheResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::debug;

/// In-memory cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,

    /// Sweep interval for expired entries
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    expires_at: Instant,
    /// Logical clock value of the last read or write
    last_access: AtomicU64,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    config: InMemoryCacheConfig,
    entries: Arc<DashMap<String, Slot>>,
    clock: AtomicU64,
    evictions: AtomicU64,
    cleanup_task: JoinHandle<()>,
}

impl InMemoryCache {
    /// Create a new in-memory cache; must be called inside a Tokio runtime
    pub fn new(config: InMemoryCacheConfig) -> Self {
        let entries: Arc<DashMap<String, Slot>> = Arc::new(DashMap::new());

        let cleanup_task = {
            let entries = Arc::clone(&entries);
            let cleanup_interval = config.cleanup_interval;

            tokio::spawn(async move {
                let mut ticker = interval(cleanup_interval);
                loop {
                    ticker.tick().await;
                    Self::sweep_expired(&entries);
                }
            })
        };

        Self {
            config,
            entries,
            clock: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            cleanup_task,
        }
    }

    fn sweep_expired(entries: &DashMap<String, Slot>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(entries.len());

        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Evict the least recently accessed entry when a new key would exceed capacity
    fn evict_if_needed(&self, incoming: &str) {
        if self.entries.len() < self.config.max_entries || self.entries.contains_key(incoming) {
            return;
        }

        if Self::sweep_expired(&self.entries) > 0 && self.entries.len() < self.config.max_entries {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|slot| slot.last_access.load(Ordering::Relaxed))
            .map(|slot| slot.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted least recently accessed entry");
        }
    }

    /// Number of live entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn delete_where<F: Fn(&str) -> bool>(&self, matches: F) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|key, _| !matches(key));
        before.saturating_sub(self.entries.len()) as u64
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        self.cleanup_task.abort();
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(slot) if !slot.is_expired(now) => {
                slot.last_access.store(self.tick(), Ordering::Relaxed);
                return Ok(Some(slot.entry.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> CacheResult<()> {
        self.evict_if_needed(key);

        self.entries.insert(
            key.to_string(),
            Slot {
                entry: entry.clone(),
                expires_at: Instant::now() + ttl,
                last_access: AtomicU64::new(self.tick()),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .map(|slot| !slot.is_expired(now))
            .unwrap_or(false))
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
        Ok(self.delete_where(|key| key.starts_with(prefix)))
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        let matcher = glob_to_regex(pattern)?;
        Ok(self.delete_where(|key| matcher.is_match(key)))
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn entry(payload: &'static [u8]) -> CacheEntry {
        CacheEntry::new(Bytes::from_static(payload), "fp".to_string(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = InMemoryCache::new(InMemoryCacheConfig::default());
        let ttl = Duration::from_secs(60);

        cache.set("report:progress:a:b:1", &entry(b"value"), ttl).await.unwrap();
        let fetched = cache.get("report:progress:a:b:1").await.unwrap().unwrap();
        assert_eq!(fetched.payload, Bytes::from_static(b"value"));

        assert!(cache.exists("report:progress:a:b:1").await.unwrap());
        assert!(cache.delete("report:progress:a:b:1").await.unwrap());
        assert!(!cache.exists("report:progress:a:b:1").await.unwrap());
        assert!(!cache.delete("report:progress:a:b:1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let cache = InMemoryCache::new(InMemoryCacheConfig::default());
        cache.set("k", &entry(b"v"), Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_sweeps_expired_entries() {
        let config = InMemoryCacheConfig {
            cleanup_interval: Duration::from_secs(1),
            ..Default::default()
        };
        let cache = InMemoryCache::new(config);
        cache.set("short", &entry(b"v"), Duration::from_millis(500)).await.unwrap();
        cache.set("long", &entry(b"v"), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_least_recently_accessed_eviction() {
        let config = InMemoryCacheConfig {
            max_entries: 2,
            ..Default::default()
        };
        let cache = InMemoryCache::new(config);
        let ttl = Duration::from_secs(60);

        cache.set("a", &entry(b"1"), ttl).await.unwrap();
        cache.set("b", &entry(b"2"), ttl).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("c", &entry(b"3"), ttl).await.unwrap();

        assert!(cache.exists("a").await.unwrap());
        assert!(!cache.exists("b").await.unwrap());
        assert!(cache.exists("c").await.unwrap());
        assert_eq!(cache.evictions(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let config = InMemoryCacheConfig {
            max_entries: 1,
            ..Default::default()
        };
        let cache = InMemoryCache::new(config);
        let ttl = Duration::from_secs(60);

        cache.set("a", &entry(b"1"), ttl).await.unwrap();
        cache.set("a", &entry(b"2"), ttl).await.unwrap();
        assert_eq!(cache.evictions(), 0);
        assert_eq!(cache.get("a").await.unwrap().unwrap().payload, Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn test_prefix_and_pattern_deletion() {
        let cache = InMemoryCache::new(InMemoryCacheConfig::default());
        let ttl = Duration::from_secs(60);

        for key in [
            "report:progress:math:student-1:d1",
            "report:progress:math:student-2:d1",
            "report:progress:science:student-1:d1",
            "report:analytics:student-1:~global:d1",
        ] {
            cache.set(key, &entry(b"v"), ttl).await.unwrap();
        }

        assert_eq!(cache.delete_by_prefix("report:progress:math:").await.unwrap(), 2);
        assert_eq!(cache.delete_matching("report:*:*:student-1:*").await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.exists("report:analytics:student-1:~global:d1").await.unwrap());
    }
}
