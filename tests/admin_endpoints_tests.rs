//! # Admin Endpoint Tests
//!
//! Exercises the admin listener of a fully assembled server: statistics after report
//! traffic, scoped purges, event ingestion and liveness.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use report_cache::caching::admin::{CacheInvalidationResponse, CacheStatsResponse};
use report_cache::caching::{
    FnProducer, InMemoryCache, InMemoryCacheConfig, ProducedReport, ReportRequest, WarmSummary,
};
use report_cache::server::LivenessResponse;
use report_cache::{ReportCacheServer, ServiceConfig};
use std::sync::Arc;
use std::time::Duration;

fn create_test_server() -> ReportCacheServer {
    let producer = Arc::new(FnProducer::new(|request: ReportRequest| async move {
        let body = serde_json::json!({
            "category": request.identity.category.as_str(),
            "entity": request.identity.entity_id,
            "requester": request.requester.segment(),
        });
        Ok(ProducedReport::new(
            body.to_string().into_bytes(),
            request.identity.category,
        ))
    }));

    ReportCacheServer::from_parts(
        ServiceConfig::default(),
        Arc::new(InMemoryCache::new(InMemoryCacheConfig::default())),
        producer,
        None,
    )
}

fn requester(id: &'static str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-requester-id"),
        HeaderValue::from_static(id),
    )
}

#[tokio::test]
async fn test_stats_reflect_report_traffic() {
    let server = create_test_server();
    let reports = TestServer::new(server.report_app()).unwrap();
    let admin = TestServer::new(server.admin_app()).unwrap();

    for _ in 0..4 {
        let (name, value) = requester("student-42");
        let response = reports
            .get("/reports/progress/math-101")
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let response = admin.get("/cache/stats").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let stats: CacheStatsResponse = response.json();
    assert_eq!(stats.stats.misses, 1);
    assert_eq!(stats.stats.hits, 3);
    assert!((stats.stats.hit_rate - 0.75).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_purge_by_identity_and_requester() {
    let server = create_test_server();
    let reports = TestServer::new(server.report_app()).unwrap();
    let admin = TestServer::new(server.admin_app()).unwrap();

    for id in ["student-1", "student-2"] {
        let (name, value) = requester(id);
        reports
            .get("/reports/progress/math-101")
            .add_header(name, value)
            .await;
    }

    let response = admin
        .delete("/cache/progress:math-101")
        .add_query_param("requester", "student-1")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let purge: CacheInvalidationResponse = response.json();
    assert_eq!(purge.deleted, 1);
    assert_eq!(purge.scope, "progress:math-101:student-1");

    let (name, value) = requester("student-2");
    let still_cached = reports
        .get("/reports/progress/math-101")
        .add_header(name, value)
        .await;
    assert_eq!(still_cached.header("x-cache"), "HIT");

    let (name, value) = requester("student-1");
    let purged = reports
        .get("/reports/progress/math-101")
        .add_header(name, value)
        .await;
    assert_eq!(purged.header("x-cache"), "MISS");
}

#[tokio::test]
async fn test_warm_then_purge_everything() {
    let server = create_test_server();
    let admin = TestServer::new(server.admin_app()).unwrap();

    let response = admin
        .post("/cache/warm")
        .json(&serde_json::json!({
            "identities": [
                {"category": "distribution", "entityId": "math-101"},
                {"category": "analytics", "entityId": "term-1", "filters": {"year": "2024"}}
            ]
        }))
        .await;
    let summary: WarmSummary = response.json();
    assert_eq!(summary.cached, 2);

    let response = admin.delete("/cache").add_query_param("confirm", "false").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = admin.delete("/cache").add_query_param("confirm", "true").await;
    let purge: CacheInvalidationResponse = response.json();
    assert_eq!(purge.deleted, 2);
}

#[tokio::test]
async fn test_event_ingestion_invalidates_asynchronously() {
    let server = create_test_server();
    let manager = server.cache_manager();
    let reports = TestServer::new(server.report_app()).unwrap();
    let admin = TestServer::new(server.admin_app()).unwrap();

    let (name, value) = requester("student-42");
    reports
        .get("/reports/progress/math-101")
        .add_header(name, value)
        .await;

    let response = admin
        .post("/cache/events")
        .json(&serde_json::json!({
            "eventType": "grade_changed",
            "subjectId": "student-42"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.stats().invalidated_keys == 0 {
        assert!(tokio::time::Instant::now() < deadline, "event was not processed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (name, value) = requester("student-42");
    let response = reports
        .get("/reports/progress/math-101")
        .add_header(name, value)
        .await;
    assert_eq!(response.header("x-cache"), "MISS");
}

#[tokio::test]
async fn test_liveness_and_disabled_metrics() {
    let server = create_test_server();
    let admin = TestServer::new(server.admin_app()).unwrap();

    let response = admin.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let liveness: LivenessResponse = response.json();
    assert_eq!(liveness.status, "ok");

    assert_eq!(admin.get("/metrics").await.status_code(), StatusCode::NOT_FOUND);
}
