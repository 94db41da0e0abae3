//! # Redis Cache Store
//!
//! Shared cache backend over a `ConnectionManager`. Entries are stored as JSON with a
//! millisecond TTL (`PSETEX`); group deletion walks `SCAN MATCH` and deletes in batches.

use super::{CacheEntry, CacheStore};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Redis cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Namespace prepended to every report key
    pub key_prefix: String,

    /// Retries after a failed command
    pub max_retries: u32,

    /// Base delay between retries, multiplied by the attempt number
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// SCAN batch size hint
    pub scan_count: usize,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            key_prefix: "report-cache:".to_string(),
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
            scan_count: 1000,
        }
    }
}

/// Redis cache implementation
pub struct RedisCache {
    config: RedisCacheConfig,
    connection_manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn new(config: RedisCacheConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;

        let connection_manager =
            tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| CacheError::Timeout)??;

        info!(url = %config.url, "Redis cache connected");

        Ok(Self {
            config,
            connection_manager,
        })
    }

    /// Get the full cache key with prefix
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Run a command, retrying with linear backoff.
    ///
    /// `ConnectionManager` reconnects on its own, so each attempt just takes a fresh clone.
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> CacheResult<T>
    where
        F: Fn(ConnectionManager) -> Fut + Send + Sync,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        let mut retries = 0;

        loop {
            match operation(self.connection_manager.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if retries >= self.config.max_retries {
                        return Err(CacheError::Redis(e));
                    }

                    retries += 1;
                    warn!(error = %e, attempt = retries, "Redis command failed, retrying");
                    tokio::time::sleep(self.config.retry_delay * retries).await;
                }
            }
        }
    }

    /// Collect every key matching a namespaced pattern
    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let scan_count = self.config.scan_count;

        self.execute_with_retry(|mut conn| async move {
            let mut cursor: u64 = 0;
            let mut all_keys = Vec::new();

            loop {
                let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(scan_count)
                    .query_async(&mut conn)
                    .await?;

                all_keys.extend(keys);

                if next_cursor == 0 {
                    break;
                }
                cursor = next_cursor;
            }

            Ok::<_, redis::RedisError>(all_keys)
        })
        .await
    }

    async fn delete_keys(&self, keys: &[String]) -> CacheResult<u64> {
        let mut deleted = 0;

        for batch in keys.chunks(self.config.scan_count.max(1)) {
            let count: u64 = self
                .execute_with_retry(|mut conn| async move { conn.del::<_, u64>(batch).await })
                .await?;
            deleted += count;
        }

        Ok(deleted)
    }
}

/// Escape glob metacharacters so a literal prefix can be used in `MATCH`
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let full_key = self.full_key(key);
        let full_key = full_key.as_str();

        let raw: Option<String> = self
            .execute_with_retry(|mut conn| async move { conn.get::<_, Option<String>>(full_key).await })
            .await?;

        match raw {
            Some(raw) => Ok(Some(CacheEntry::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> CacheResult<()> {
        let full_key = self.full_key(key);
        let full_key = full_key.as_str();
        let value = entry.to_json()?;
        let value = value.as_str();
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        self.execute_with_retry(|mut conn| async move {
            conn.pset_ex::<_, _, ()>(full_key, value, ttl_ms).await
        })
        .await?;

        debug!(key, ttl_ms, "Stored entry in Redis");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        let full_key = full_key.as_str();

        let deleted: u64 = self
            .execute_with_retry(|mut conn| async move { conn.del::<_, u64>(full_key).await })
            .await?;

        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        let full_key = full_key.as_str();

        self.execute_with_retry(|mut conn| async move { conn.exists::<_, bool>(full_key).await })
            .await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));
        let keys = self.scan_keys(&pattern).await?;
        self.delete_keys(&keys).await
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        let pattern = format!("{}{}", escape_glob(&self.config.key_prefix), pattern);
        let keys = self.scan_keys(&pattern).await?;
        self.delete_keys(&keys).await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let response: String = self
            .execute_with_retry(|mut conn| async move {
                redis::cmd("PING").query_async::<_, String>(&mut conn).await
            })
            .await?;

        Ok(response == "PONG")
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
