//! # Cache Admin Interface
//!
//! Administrative endpoints for cache monitoring, warming, manual purges and
//! out-of-process event ingestion.

use super::cache_manager::{CacheManager, InvalidationScope, WarmSummary};
use super::invalidation::{InvalidationEvent, InvalidationPublisher};
use super::producer::ReportProducer;
use super::stats::StatsSnapshot;
use super::types::{
    validate_segment, FilterSet, ReportIdentity, ReportRequest, RequesterIdentity,
};
use super::CacheResult;
use crate::core::error::ServiceError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Cache admin state
#[derive(Clone)]
pub struct CacheAdminState {
    pub cache_manager: Arc<CacheManager>,

    /// Producer used when warming
    pub producer: Arc<dyn ReportProducer>,

    /// Queue feeding the invalidation worker
    pub publisher: InvalidationPublisher,
}

/// Cache admin router
pub struct CacheAdminRouter;

impl CacheAdminRouter {
    /// Create cache admin router
    pub fn create_router(state: CacheAdminState) -> Router {
        Router::new()
            .route("/cache/stats", get(get_cache_stats))
            .route("/cache/health", get(get_cache_health))
            .route("/cache/warm", post(warm_cache))
            .route("/cache", delete(purge_all))
            .route("/cache/:report_identity", delete(purge_report))
            .route("/cache/events", post(publish_event))
            .with_state(state)
    }
}

/// Cache statistics response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Cache health response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheHealthResponse {
    pub healthy: bool,
    pub backend: String,
    pub stats: StatsSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// One identity to warm
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmIdentity {
    pub category: String,
    pub entity_id: String,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl WarmIdentity {
    fn to_request(&self) -> CacheResult<ReportRequest> {
        Ok(ReportRequest::new(
            ReportIdentity::new(self.category.parse()?, self.entity_id.clone())?,
            RequesterIdentity::from_optional(self.requester.as_deref())?,
            FilterSet::from(self.filters.clone()),
        ))
    }
}

/// Cache warm request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmRequest {
    pub identities: Vec<WarmIdentity>,
}

/// Manual purge response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheInvalidationResponse {
    pub deleted: u64,
    pub scope: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PurgeAllParams {
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Deserialize)]
pub struct PurgeReportParams {
    pub requester: Option<String>,
}

/// Event ingestion response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAcceptedResponse {
    pub accepted: bool,
    pub event_type: String,
    pub subject_id: String,
}

/// Get cache statistics
pub async fn get_cache_stats(
    State(state): State<CacheAdminState>,
) -> Result<Json<CacheStatsResponse>, ServiceError> {
    let stats = state.cache_manager.stats();

    info!(
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate,
        "Cache stats requested"
    );

    Ok(Json(CacheStatsResponse {
        stats,
        timestamp: Utc::now(),
    }))
}

/// Get cache health
pub async fn get_cache_health(
    State(state): State<CacheAdminState>,
) -> Result<Json<CacheHealthResponse>, ServiceError> {
    let health = state.cache_manager.health_check().await;

    if !health.healthy {
        warn!(backend = %health.backend, "Cache backend reported unhealthy");
    }

    Ok(Json(CacheHealthResponse {
        healthy: health.healthy,
        backend: health.backend,
        stats: state.cache_manager.stats(),
        timestamp: Utc::now(),
    }))
}

/// Warm the cache for a list of identities
pub async fn warm_cache(
    State(state): State<CacheAdminState>,
    Json(request): Json<WarmRequest>,
) -> Result<Json<WarmSummary>, ServiceError> {
    let mut requests = Vec::with_capacity(request.identities.len());
    let mut rejected = 0;

    for identity in &request.identities {
        match identity.to_request() {
            Ok(request) => requests.push(request),
            Err(e) => {
                warn!(category = %identity.category, entity = %identity.entity_id, error = %e, "Skipping malformed warm identity");
                rejected += 1;
            }
        }
    }

    let mut summary = state
        .cache_manager
        .warm(requests, state.producer.as_ref())
        .await;
    summary.record_rejected(rejected);

    Ok(Json(summary))
}

/// Purge every cached report; requires `?confirm=true`
pub async fn purge_all(
    State(state): State<CacheAdminState>,
    Query(params): Query<PurgeAllParams>,
) -> Result<Json<CacheInvalidationResponse>, ServiceError> {
    if !params.confirm {
        return Err(ServiceError::validation(
            "confirm",
            "purging the whole cache requires confirm=true",
        ));
    }

    let deleted = state.cache_manager.invalidate(InvalidationScope::All).await?;
    warn!(deleted, "Entire report cache purged");

    Ok(Json(CacheInvalidationResponse {
        deleted,
        scope: "all".to_string(),
        timestamp: Utc::now(),
    }))
}

/// Purge one report identity across requesters and filters
pub async fn purge_report(
    State(state): State<CacheAdminState>,
    Path(report_identity): Path<String>,
    Query(params): Query<PurgeReportParams>,
) -> Result<Json<CacheInvalidationResponse>, ServiceError> {
    let identity: ReportIdentity = report_identity.parse()?;
    // An empty `requester=` means every requester, not the global entry
    let requester = match params.requester.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Some(RequesterIdentity::from_optional(Some(id))?),
        _ => None,
    };

    let scope = match &requester {
        Some(requester) => format!("{}:{}", identity, requester),
        None => identity.to_string(),
    };

    let deleted = state
        .cache_manager
        .invalidate(InvalidationScope::Scoped {
            category: Some(identity.category),
            entity_id: Some(identity.entity_id),
            requester,
        })
        .await?;

    Ok(Json(CacheInvalidationResponse {
        deleted,
        scope,
        timestamp: Utc::now(),
    }))
}

/// Accept a domain change event for asynchronous invalidation
pub async fn publish_event(
    State(state): State<CacheAdminState>,
    Json(event): Json<InvalidationEvent>,
) -> Result<(StatusCode, Json<EventAcceptedResponse>), ServiceError> {
    validate_segment("subject id", event.subject_id.trim())?;

    let response = EventAcceptedResponse {
        accepted: true,
        event_type: event.event_type.clone(),
        subject_id: event.subject_id.clone(),
    };

    if !state.publisher.publish(event) {
        return Err(ServiceError::CacheUnavailable {
            message: "invalidation queue is full".to_string(),
        });
    }

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::cache_manager::CacheManagerConfig;
    use crate::caching::invalidation::{InvalidationConfig, InvalidationDispatcher};
    use crate::caching::producer::{FnProducer, ProducedReport};
    use crate::caching::stores::guarded::test_support::BrokenStore;
    use crate::caching::stores::{CacheStore, InMemoryCache, InMemoryCacheConfig};
    use axum_test::TestServer;
    use std::time::Duration;

    fn create_test_state() -> (CacheAdminState, Arc<InvalidationDispatcher>) {
        create_test_state_over(
            Arc::new(InMemoryCache::new(InMemoryCacheConfig::default())),
            CacheManagerConfig::default(),
        )
    }

    fn create_test_state_over(
        backend: Arc<dyn CacheStore>,
        config: CacheManagerConfig,
    ) -> (CacheAdminState, Arc<InvalidationDispatcher>) {
        let cache_manager = Arc::new(CacheManager::new(backend, config));
        let dispatcher = Arc::new(InvalidationDispatcher::new(
            cache_manager.guarded_store(),
            cache_manager.stats_collector(),
            InvalidationConfig::default(),
        ));
        let (publisher, _worker) = Arc::clone(&dispatcher).spawn();
        let producer = Arc::new(FnProducer::new(|request: ReportRequest| async move {
            Ok(ProducedReport::new(
                format!("{{\"entity\":\"{}\"}}", request.identity.entity_id).into_bytes(),
                request.identity.category,
            ))
        }));

        (
            CacheAdminState {
                cache_manager,
                producer,
                publisher,
            },
            dispatcher,
        )
    }

    #[tokio::test]
    async fn test_cache_stats_endpoint() {
        let (state, _) = create_test_state();
        let server = TestServer::new(CacheAdminRouter::create_router(state)).unwrap();

        let response = server.get("/cache/stats").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: serde_json::Value = response.json();
        assert_eq!(body["hits"], 0);
        assert_eq!(body["misses"], 0);
        assert_eq!(body["hitRate"], 0.0);
    }

    #[tokio::test]
    async fn test_cache_health_endpoint() {
        let (state, _) = create_test_state();
        let server = TestServer::new(CacheAdminRouter::create_router(state)).unwrap();

        let response = server.get("/cache/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let health: CacheHealthResponse = response.json();
        assert!(health.healthy);
        assert_eq!(health.backend, "memory");
    }

    #[tokio::test]
    async fn test_warm_counts_malformed_identities_as_failed() {
        let (state, _) = create_test_state();
        let server = TestServer::new(CacheAdminRouter::create_router(state.clone())).unwrap();

        let response = server
            .post("/cache/warm")
            .json(&serde_json::json!({
                "identities": [
                    {"category": "progress", "entityId": "math-101", "requester": "student-42"},
                    {"category": "analytics", "entityId": "term-1", "filters": {"year": "2024"}},
                    {"category": "progress", "entityId": "bad id"}
                ]
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let summary: WarmSummary = response.json();
        assert_eq!(summary, WarmSummary { total: 3, cached: 2, failed: 1 });
        assert_eq!(state.cache_manager.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_purge_all_requires_confirmation() {
        let (state, _) = create_test_state();
        let server = TestServer::new(CacheAdminRouter::create_router(state)).unwrap();

        let response = server.delete("/cache").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server.delete("/cache").add_query_param("confirm", "true").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: CacheInvalidationResponse = response.json();
        assert_eq!(body.scope, "all");
    }

    #[tokio::test]
    async fn test_purge_single_report_identity() {
        let (state, _) = create_test_state();
        let server = TestServer::new(CacheAdminRouter::create_router(state.clone())).unwrap();

        server
            .post("/cache/warm")
            .json(&serde_json::json!({
                "identities": [
                    {"category": "progress", "entityId": "math-101", "requester": "s1"},
                    {"category": "progress", "entityId": "math-101", "requester": "s2"},
                    {"category": "progress", "entityId": "bio-200", "requester": "s1"}
                ]
            }))
            .await;

        let response = server.delete("/cache/progress:math-101").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: CacheInvalidationResponse = response.json();
        assert_eq!(body.deleted, 2);
        assert_eq!(body.scope, "progress:math-101");

        let response = server.delete("/cache/not-an-identity").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_purge_with_blank_requester_covers_all_requesters() {
        let (state, _) = create_test_state();
        let server = TestServer::new(CacheAdminRouter::create_router(state)).unwrap();

        server
            .post("/cache/warm")
            .json(&serde_json::json!({
                "identities": [
                    {"category": "progress", "entityId": "math-101", "requester": "s1"},
                    {"category": "progress", "entityId": "math-101", "requester": "s2"}
                ]
            }))
            .await;

        let response = server
            .delete("/cache/progress:math-101")
            .add_query_param("requester", "")
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: CacheInvalidationResponse = response.json();
        assert_eq!(body.deleted, 2);
        assert_eq!(body.scope, "progress:math-101");
    }

    #[tokio::test]
    async fn test_purge_with_requester_is_narrowed() {
        let (state, _) = create_test_state();
        let server = TestServer::new(CacheAdminRouter::create_router(state)).unwrap();

        server
            .post("/cache/warm")
            .json(&serde_json::json!({
                "identities": [
                    {"category": "progress", "entityId": "math-101", "requester": "s1"},
                    {"category": "progress", "entityId": "math-101", "requester": "s2"}
                ]
            }))
            .await;

        let response = server
            .delete("/cache/progress:math-101")
            .add_query_param("requester", "s1")
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: CacheInvalidationResponse = response.json();
        assert_eq!(body.deleted, 1);
        assert_eq!(body.scope, "progress:math-101:s1");
    }

    #[tokio::test]
    async fn test_purge_against_unavailable_backend() {
        let config = CacheManagerConfig {
            bulk_operation_timeout: Duration::from_millis(50),
            ..CacheManagerConfig::default()
        };

        for backend in [
            BrokenStore::failing(),
            BrokenStore::stalling(Duration::from_secs(30)),
        ] {
            let (state, _) = create_test_state_over(Arc::new(backend), config.clone());
            let server = TestServer::new(CacheAdminRouter::create_router(state)).unwrap();

            let response = server.delete("/cache/progress:math-101").await;
            assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);

            let response = server.delete("/cache").add_query_param("confirm", "true").await;
            assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[tokio::test]
    async fn test_event_ingestion() {
        let (state, dispatcher) = create_test_state();
        let mut reports = dispatcher.subscribe();
        let server = TestServer::new(CacheAdminRouter::create_router(state)).unwrap();

        let response = server
            .post("/cache/events")
            .json(&serde_json::json!({
                "eventType": "grade_changed",
                "subjectId": "student-42",
                "affectedCategories": ["progress"]
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::ACCEPTED);

        let report = reports.recv().await.unwrap();
        assert_eq!(report.subject_id, "student-42");

        let response = server
            .post("/cache/events")
            .json(&serde_json::json!({"eventType": "grade_changed", "subjectId": "a b"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }
}
