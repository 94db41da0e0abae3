//! # Report Caching Module
//!
//! Cache-aside storage for expensive analytical reports with event-driven invalidation.
//!
//! ## Architecture
//! 1. **Key codec**: deterministic keys from report identity, requester and filters
//! 2. **TTL policy**: per-category freshness windows
//! 3. **Cache stores**: in-memory and Redis backends behind a fail-open guard
//! 4. **Cache manager**: the `get` / `warm` / `invalidate` / `stats` façade
//! 5. **Invalidation**: domain events mapped to key groups through a cascade table
//! 6. **HTTP surface**: conditional report responses and admin endpoints
//!
//! ## Usage Example
//! ```rust,no_run
//! # async fn example() -> Result<(), report_cache::caching::CacheError> {
//! use std::sync::Arc;
//! use report_cache::caching::{
//!     CacheManager, CacheManagerConfig, FilterSet, FnProducer, InMemoryCache,
//!     InMemoryCacheConfig, ProducedReport, ReportCategory, ReportIdentity, ReportRequest,
//!     RequesterIdentity,
//! };
//!
//! let store = Arc::new(InMemoryCache::new(InMemoryCacheConfig::default()));
//! let manager = CacheManager::new(store, CacheManagerConfig::default());
//!
//! let producer = FnProducer::new(|request: ReportRequest| async move {
//!     Ok(ProducedReport::new(b"{}".to_vec(), request.identity.category))
//! });
//!
//! let request = ReportRequest::new(
//!     ReportIdentity::new(ReportCategory::Progress, "math-101")?,
//!     RequesterIdentity::user("student-42")?,
//!     FilterSet::new().with("term", "fall"),
//! );
//!
//! let outcome = manager.get(&request, &producer).await?;
//! assert!(!outcome.from_cache);
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod cache_manager;
pub mod conditional;
pub mod fingerprint;
pub mod invalidation;
pub mod key_codec;
pub mod producer;
pub mod reports;
pub mod stats;
pub mod stores;
pub mod ttl_policy;
pub mod types;

pub use admin::{CacheAdminRouter, CacheAdminState};
pub use cache_manager::{
    CacheHealth, CacheManager, CacheManagerConfig, InvalidationScope, RefreshOutcome,
    ReportOutcome, WarmSummary,
};
pub use conditional::{ConditionalRequestAdapter, ConditionalResponse};
pub use fingerprint::FingerprintService;
pub use invalidation::{
    CascadeRule, CascadeScope, CascadeTable, InvalidationConfig, InvalidationDispatcher,
    InvalidationEvent, InvalidationPublisher, InvalidationReport,
};
pub use key_codec::{CacheKey, KeyCodec, KeyScope};
pub use producer::{
    FnProducer, HttpReportProducer, ProducedReport, ProducerConfig, ProducerError, ReportProducer,
};
pub use reports::{ReportRouter, ReportState};
pub use stats::{StatsCollector, StatsSnapshot};
pub use stores::{
    CacheEntry, CacheStore, GuardedStore, InMemoryCache, InMemoryCacheConfig, RedisCache,
    RedisCacheConfig,
};
pub use ttl_policy::{TtlConfig, TtlPolicy};
pub use types::{FilterSet, ReportCategory, ReportIdentity, ReportRequest, RequesterIdentity};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Invalid identity: {message}")]
    InvalidIdentity { message: String },

    #[error("Invalid invalidation scope: {message}")]
    InvalidScope { message: String },

    #[error("Cache backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("Cache operation timeout")]
    Timeout,

    #[error(transparent)]
    ProducerFailure(#[from] ProducerError),

    #[error("Invalidation incomplete: {failed} of {total} patterns failed")]
    InvalidationPartialFailure {
        failed: usize,
        total: usize,
        patterns: Vec<String>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },
}

impl CacheError {
    pub fn invalid_identity<S: Into<String>>(message: S) -> Self {
        Self::InvalidIdentity {
            message: message.into(),
        }
    }

    pub fn invalid_scope<S: Into<String>>(message: S) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Collapse infrastructure failures, timeouts included, into `BackendUnavailable`
    pub fn into_backend_unavailable(self) -> Self {
        match self {
            Self::BackendUnavailable { .. } => self,
            other => Self::BackendUnavailable {
                message: other.to_string(),
            },
        }
    }

    /// Whether the error comes from the cache infrastructure rather than the caller or producer
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. }
                | Self::Timeout
                | Self::InvalidationPartialFailure { .. }
                | Self::Serialization(_)
                | Self::Redis(_)
        )
    }
}
