//! # Prometheus Metrics
//!
//! The cache core records through the `metrics` facade; this module installs the
//! Prometheus recorder behind it and exposes the text rendering on `/metrics`.

use crate::caching::stats::{
    METRIC_BACKEND_BYPASSES, METRIC_DROPPED_EVENTS, METRIC_HITS, METRIC_INVALIDATED_KEYS,
    METRIC_INVALIDATION_FAILURES, METRIC_MISSES, METRIC_PRODUCER_DURATION, METRIC_STORE_FAILURES,
};
use crate::core::error::{ServiceError, ServiceResult};
use axum::{extract::State, routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Report generation usually takes from tens of milliseconds to tens of seconds
pub const PRODUCER_DURATION_BUCKETS: [f64; 10] =
    [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Exporter with the service label and producer latency buckets applied
pub fn builder() -> ServiceResult<PrometheusBuilder> {
    PrometheusBuilder::new()
        .add_global_label("service", "report-cache")
        .set_buckets_for_metric(
            Matcher::Full(METRIC_PRODUCER_DURATION.to_string()),
            &PRODUCER_DURATION_BUCKETS,
        )
        .map_err(|e| ServiceError::config(format!("Failed to set histogram buckets: {}", e)))
}

/// Install the global recorder and describe the cache metrics
pub fn install_recorder() -> ServiceResult<PrometheusHandle> {
    let handle = builder()?
        .install_recorder()
        .map_err(|e| ServiceError::internal(format!("Failed to install metrics recorder: {}", e)))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(METRIC_HITS, "Report lookups served from the cache");
    describe_counter!(METRIC_MISSES, "Report lookups that invoked the producer");
    describe_counter!(
        METRIC_BACKEND_BYPASSES,
        "Cache store calls that failed or timed out and were bypassed"
    );
    describe_counter!(METRIC_STORE_FAILURES, "Produced reports that could not be stored");
    describe_counter!(METRIC_INVALIDATED_KEYS, "Cache entries removed by invalidation");
    describe_counter!(
        METRIC_INVALIDATION_FAILURES,
        "Invalidation deletions abandoned after retries"
    );
    describe_counter!(METRIC_DROPPED_EVENTS, "Invalidation events that were not processed");
    describe_histogram!(
        METRIC_PRODUCER_DURATION,
        Unit::Seconds,
        "Time spent producing a report on a cache miss"
    );
}

/// `GET /metrics` in the Prometheus text format
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(handle)
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
