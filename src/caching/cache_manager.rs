//! # Cache Manager
//!
//! The façade the rest of the service talks to. It ties the key codec, TTL policy,
//! guarded store, fingerprinting and statistics together into cache-aside reads,
//! warming, manual purges and forced refreshes.

use super::fingerprint::FingerprintService;
use super::key_codec::{CacheKey, KeyCodec, KeyScope};
use super::producer::ReportProducer;
use super::stats::{StatsCollector, StatsSnapshot, METRIC_PRODUCER_DURATION};
use super::stores::guarded::{DEFAULT_BULK_TIMEOUT, DEFAULT_OPERATION_TIMEOUT};
use super::stores::{CacheEntry, CacheStore, GuardedStore};
use super::ttl_policy::{TtlConfig, TtlPolicy};
use super::types::{ReportCategory, ReportRequest, RequesterIdentity};
use super::{CacheError, CacheResult};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Cache manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheManagerConfig {
    /// Per-category TTLs
    pub ttl: TtlConfig,

    /// Deadline for single-key store calls
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Deadline for prefix and pattern deletion
    #[serde(with = "humantime_serde")]
    pub bulk_operation_timeout: Duration,

    /// Concurrent producer calls while warming
    pub warm_concurrency: usize,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            ttl: TtlConfig::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            bulk_operation_timeout: DEFAULT_BULK_TIMEOUT,
            warm_concurrency: 4,
        }
    }
}

/// Result of a cache-aside read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub payload: Bytes,
    pub fingerprint: String,
    /// Served from the cache without calling the producer
    pub from_cache: bool,
    /// Entry is in the cache after this call
    pub stored: bool,
    /// Remaining freshness for hits, resolved TTL for misses
    pub ttl: Duration,
}

/// Result of a forced recomputation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub outcome: ReportOutcome,
    pub previous_fingerprint: Option<String>,
    /// The payload differs from the previously cached one (or nothing was cached)
    pub changed: bool,
}

/// Aggregate outcome of a warm run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmSummary {
    pub total: usize,
    pub cached: usize,
    pub failed: usize,
}

impl WarmSummary {
    fn record(&mut self, cached: bool) {
        self.total += 1;
        if cached {
            self.cached += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Count identities that were rejected before reaching the cache
    pub fn record_rejected(&mut self, count: usize) {
        self.total += count;
        self.failed += count;
    }
}

/// What a manual purge covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Every report key; requires explicit confirmation at the admin surface
    All,
    Scoped {
        category: Option<ReportCategory>,
        entity_id: Option<String>,
        requester: Option<RequesterIdentity>,
    },
}

/// Backend health summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHealth {
    pub backend: String,
    pub healthy: bool,
}

/// Report cache façade
pub struct CacheManager {
    store: GuardedStore,
    codec: KeyCodec,
    ttl_policy: Arc<TtlPolicy>,
    fingerprints: FingerprintService,
    stats: Arc<StatsCollector>,
    warm_concurrency: usize,
}

impl CacheManager {
    /// Create a cache manager over a backend
    pub fn new(backend: Arc<dyn CacheStore>, config: CacheManagerConfig) -> Self {
        let stats = Arc::new(StatsCollector::new());
        let store = GuardedStore::new(backend, Arc::clone(&stats))
            .with_operation_timeout(config.operation_timeout)
            .with_bulk_timeout(config.bulk_operation_timeout);

        info!(
            backend = store.backend_name(),
            operation_timeout_ms = config.operation_timeout.as_millis() as u64,
            "Report cache manager initialized"
        );

        Self {
            store,
            codec: KeyCodec::new(),
            ttl_policy: Arc::new(TtlPolicy::new(config.ttl)),
            fingerprints: FingerprintService::new(),
            stats,
            warm_concurrency: config.warm_concurrency.max(1),
        }
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn ttl_policy(&self) -> Arc<TtlPolicy> {
        Arc::clone(&self.ttl_policy)
    }

    pub fn stats_collector(&self) -> Arc<StatsCollector> {
        Arc::clone(&self.stats)
    }

    /// The fail-open store shared with the invalidation dispatcher
    pub fn guarded_store(&self) -> GuardedStore {
        self.store.clone()
    }

    /// Cache-aside read: serve a stored entry or produce, store and return a fresh one
    #[instrument(skip(self, request, producer), fields(category = %request.identity.category, entity = %request.identity.entity_id))]
    pub async fn get(
        &self,
        request: &ReportRequest,
        producer: &dyn ReportProducer,
    ) -> CacheResult<ReportOutcome> {
        let key = self.codec.encode(request)?;

        if let Some(entry) = self.store.get(key.as_str()).await {
            self.stats.record_hit();
            debug!(key = %key, "Report cache hit");

            let ttl = entry.remaining_ttl();
            return Ok(ReportOutcome {
                payload: entry.payload,
                fingerprint: entry.fingerprint,
                from_cache: true,
                stored: true,
                ttl,
            });
        }

        self.stats.record_miss();
        debug!(key = %key, "Report cache miss");

        self.produce_and_store(&key, request, producer).await
    }

    async fn produce_and_store(
        &self,
        key: &CacheKey,
        request: &ReportRequest,
        producer: &dyn ReportProducer,
    ) -> CacheResult<ReportOutcome> {
        let category = request.category();

        let started = Instant::now();
        let produced = producer.produce(request).await;
        histogram!(METRIC_PRODUCER_DURATION, "category" => category.to_string())
            .record(started.elapsed().as_secs_f64());
        let produced = produced?;

        if &produced.category != category {
            warn!(
                key = %key,
                requested = %category,
                produced = %produced.category,
                "Producer returned a different category, keeping the requested one"
            );
        }

        let fingerprint = self.fingerprints.compute(&produced.payload);
        let ttl = self.ttl_policy.resolve(category);
        let entry = CacheEntry::new(produced.payload, fingerprint, ttl);

        let stored = self.store.set(key.as_str(), &entry, ttl).await;
        if !stored {
            self.stats.record_store_failure();
            warn!(key = %key, "Failed to store produced report, serving uncached");
        }

        Ok(ReportOutcome {
            payload: entry.payload,
            fingerprint: entry.fingerprint,
            from_cache: false,
            stored,
            ttl,
        })
    }

    /// Pre-populate the cache; each request is isolated from the others' failures
    #[instrument(skip(self, requests, producer), fields(total = requests.len()))]
    pub async fn warm(
        &self,
        requests: Vec<ReportRequest>,
        producer: &dyn ReportProducer,
    ) -> WarmSummary {
        let summary = stream::iter(requests)
            .map(|request| async move {
                match self.get(&request, producer).await {
                    Ok(outcome) => outcome.from_cache || outcome.stored,
                    Err(e) => {
                        warn!(identity = %request.identity, error = %e, "Warm-up failed for report");
                        false
                    }
                }
            })
            .buffer_unordered(self.warm_concurrency)
            .fold(WarmSummary::default(), |mut summary, cached| async move {
                summary.record(cached);
                summary
            })
            .await;

        info!(
            total = summary.total,
            cached = summary.cached,
            failed = summary.failed,
            "Cache warm-up finished"
        );
        summary
    }

    /// Manual purge; returns the number of deleted keys
    #[instrument(skip(self))]
    pub async fn invalidate(&self, scope: InvalidationScope) -> CacheResult<u64> {
        let key_scope = match scope {
            InvalidationScope::All => KeyScope::all(),
            InvalidationScope::Scoped {
                category,
                entity_id,
                requester,
            } => {
                let key_scope = KeyScope {
                    category,
                    entity_id,
                    requester,
                };
                if key_scope.is_unbounded() {
                    return Err(CacheError::invalid_scope(
                        "at least one of category, entity or requester is required; use the explicit purge-all operation instead",
                    ));
                }
                key_scope
            }
        };

        let pattern = self.codec.scope_pattern(&key_scope)?;
        let deleted = match key_scope.prefix() {
            Some(prefix) => self.store.delete_by_prefix(&prefix).await?,
            None => self.store.delete_matching(&pattern).await?,
        };

        self.stats.record_invalidated(deleted);
        info!(pattern = %pattern, deleted, "Manual cache invalidation");
        Ok(deleted)
    }

    /// Recompute a report regardless of what is cached and report whether it changed
    #[instrument(skip(self, request, producer), fields(category = %request.identity.category, entity = %request.identity.entity_id))]
    pub async fn refresh(
        &self,
        request: &ReportRequest,
        producer: &dyn ReportProducer,
    ) -> CacheResult<RefreshOutcome> {
        let key = self.codec.encode(request)?;
        let previous_fingerprint = self.store.get(key.as_str()).await.map(|e| e.fingerprint);

        let outcome = self.produce_and_store(&key, request, producer).await?;
        let changed = previous_fingerprint.as_deref() != Some(outcome.fingerprint.as_str());

        if changed {
            info!(key = %key, "Report content changed on refresh");
        }

        Ok(RefreshOutcome {
            outcome,
            previous_fingerprint,
            changed,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn health_check(&self) -> CacheHealth {
        CacheHealth {
            backend: self.store.backend_name().to_string(),
            healthy: self.store.health_check().await,
        }
    }
}
