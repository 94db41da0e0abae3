//! # Cache Stores Module
//!
//! Backends for cached report entries: an in-memory store for single-node use and tests,
//! a Redis store for shared deployments, and a guard that makes any backend fail open.

pub mod guarded;
pub mod memory;
pub mod redis_store;

pub use guarded::GuardedStore;
pub use memory::{InMemoryCache, InMemoryCacheConfig};
pub use redis_store::{RedisCache, RedisCacheConfig};

use super::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The stored unit for one cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Report payload, base64 encoded on the wire
    #[serde(with = "payload_base64")]
    pub payload: Bytes,

    /// Content fingerprint of `payload`
    pub fingerprint: String,

    /// When the entry was written
    pub stored_at: DateTime<Utc>,

    /// TTL the entry was written with
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn new(payload: Bytes, fingerprint: String, ttl: Duration) -> Self {
        Self {
            payload,
            fingerprint,
            stored_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
        }
    }

    /// Time since the entry was written
    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Freshness left before the TTL elapses
    pub fn remaining_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds).saturating_sub(self.age())
    }

    pub fn to_json(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

mod payload_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get an entry from the cache
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Store an entry with a TTL enforced by the backend
    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> CacheResult<()>;

    /// Delete one key; returns whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Check if a key exists in the cache
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key starting with `prefix`; returns the number deleted
    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Delete every key matching a `*` glob; returns the number deleted
    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;

    /// Short backend name for logs and health output
    fn backend_name(&self) -> &'static str;
}

/// Compile a `*` glob into an anchored regex
pub(crate) fn glob_to_regex(pattern: &str) -> CacheResult<regex::Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    regex::Regex::new(&format!("^{}$", escaped)).map_err(|e| super::CacheError::Configuration {
        message: format!("invalid key pattern '{}': {}", pattern, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_json_round_trip() {
        let entry = CacheEntry::new(
            Bytes::from_static(b"\x00\x01binary"),
            "abc".to_string(),
            Duration::from_secs(300),
        );
        let json = entry.to_json().unwrap();
        assert!(json.contains("\"ttlSeconds\":300"));

        let decoded = CacheEntry::from_json(&json).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_remaining_ttl_is_bounded_by_ttl() {
        let entry = CacheEntry::new(Bytes::from_static(b"x"), "fp".to_string(), Duration::from_secs(60));
        assert!(entry.remaining_ttl() <= Duration::from_secs(60));
        assert!(entry.remaining_ttl() > Duration::from_secs(55));
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        assert!(CacheEntry::from_json("not json").is_err());
        assert!(CacheEntry::from_json(r#"{"payload":"%%%","fingerprint":"f","storedAt":"2024-01-01T00:00:00Z","ttlSeconds":1}"#).is_err());
    }

    #[test]
    fn test_glob_matching() {
        let re = glob_to_regex("report:progress:*:student-42:*").unwrap();
        assert!(re.is_match("report:progress:math-101:student-42:abcd"));
        assert!(!re.is_match("report:analytics:math-101:student-42:abcd"));

        let literal = glob_to_regex("report:a.b:*").unwrap();
        assert!(!literal.is_match("report:aXb:c"));
    }
}
