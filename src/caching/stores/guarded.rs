//! # Fail-Open Store Guard
//!
//! Wraps any [`CacheStore`] so that the request path never waits on, or fails because of,
//! the cache backend. Point operations are bounded by a short timeout and their failures
//! are reported as a miss or a no-op; group deletions surface failures so the invalidation
//! worker can retry them.

use super::{CacheEntry, CacheStore};
use crate::caching::stats::StatsCollector;
use crate::caching::{CacheError, CacheResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout-bounded, fail-open view of a cache backend
#[derive(Clone)]
pub struct GuardedStore {
    inner: Arc<dyn CacheStore>,
    stats: Arc<StatsCollector>,
    operation_timeout: Duration,
    bulk_timeout: Duration,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn CacheStore>, stats: Arc<StatsCollector>) -> Self {
        Self {
            inner,
            stats,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            bulk_timeout: DEFAULT_BULK_TIMEOUT,
        }
    }

    /// Deadline for get/set/delete/exists
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Deadline for prefix and pattern deletion
    pub fn with_bulk_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn bounded<T, F>(&self, timeout: Duration, operation: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        }
    }

    fn bypass(&self, operation: &'static str, key: &str, error: &CacheError) {
        self.stats.record_backend_bypass(operation);
        warn!(
            operation,
            key,
            backend = self.inner.backend_name(),
            error = %error,
            "Cache backend unavailable, passing through"
        );
    }

    /// Fetch an entry; any failure is reported as a miss
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.bounded(self.operation_timeout, self.inner.get(key)).await {
            Ok(entry) => entry,
            Err(CacheError::Serialization(e)) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                let _ = self.bounded(self.operation_timeout, self.inner.delete(key)).await;
                None
            }
            Err(e) => {
                self.bypass("get", key, &e);
                None
            }
        }
    }

    /// Store an entry; returns whether the write landed
    pub async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> bool {
        match self
            .bounded(self.operation_timeout, self.inner.set(key, entry, ttl))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.bypass("set", key, &e);
                false
            }
        }
    }

    /// Delete one key; failures count as "nothing deleted"
    pub async fn delete(&self, key: &str) -> bool {
        match self.bounded(self.operation_timeout, self.inner.delete(key)).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.bypass("delete", key, &e);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.bounded(self.operation_timeout, self.inner.exists(key)).await {
            Ok(found) => found,
            Err(e) => {
                self.bypass("exists", key, &e);
                false
            }
        }
    }

    pub async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.bounded(self.bulk_timeout, self.inner.delete_by_prefix(prefix))
            .await
            .map_err(CacheError::into_backend_unavailable)
    }

    pub async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        self.bounded(self.bulk_timeout, self.inner.delete_matching(pattern))
            .await
            .map_err(CacheError::into_backend_unavailable)
    }

    /// Backend health; a timeout or error counts as unhealthy
    pub async fn health_check(&self) -> bool {
        matches!(
            self.bounded(self.operation_timeout, self.inner.health_check()).await,
            Ok(true)
        )
    }
}
