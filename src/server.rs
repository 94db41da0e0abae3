//! # HTTP Server Module
//!
//! Wires the cache core to two listeners: report traffic on `server.port`, and the admin
//! surface (cache administration, `/metrics`, `/health`) on `server.admin_port`. Both stop
//! on the same shutdown signal, after which the invalidation worker drains its queue.

use crate::caching::{
    CacheAdminRouter, CacheAdminState, CacheManager, CacheStore, HttpReportProducer,
    InMemoryCache, InvalidationDispatcher, RedisCache, ReportProducer, ReportRouter, ReportState,
};
use crate::core::config::{CacheBackend, CacheConfig, ServiceConfig};
use crate::core::error::{ServiceError, ServiceResult};
use crate::observability::metrics_router;
use axum::{response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// How long the invalidation worker may spend draining queued events on shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Liveness response for `GET /health`
#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// Report cache server with separate report and admin listeners
pub struct ReportCacheServer {
    config: ServiceConfig,
    cache_manager: Arc<CacheManager>,
    report_app: Router,
    admin_app: Router,
    invalidation_worker: JoinHandle<()>,
}

impl ReportCacheServer {
    /// Build the configured store and HTTP producer, then assemble the server
    pub async fn new(
        config: ServiceConfig,
        metrics: Option<PrometheusHandle>,
    ) -> ServiceResult<Self> {
        let store = build_store(&config.cache).await?;
        let producer = HttpReportProducer::new(&config.producer).map_err(|e| {
            ServiceError::config(format!("Failed to build report producer: {}", e))
        })?;

        Ok(Self::from_parts(config, store, Arc::new(producer), metrics))
    }

    /// Assemble the server around an existing store and producer.
    ///
    /// Spawns the invalidation worker, so it must be called inside a Tokio runtime.
    pub fn from_parts(
        config: ServiceConfig,
        store: Arc<dyn CacheStore>,
        producer: Arc<dyn ReportProducer>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let cache_manager = Arc::new(CacheManager::new(store, config.cache.manager.clone()));

        let dispatcher = Arc::new(InvalidationDispatcher::new(
            cache_manager.guarded_store(),
            cache_manager.stats_collector(),
            config.cache.invalidation.clone(),
        ));
        let (publisher, invalidation_worker) = dispatcher.spawn();

        let report_app = ReportRouter::create_router(ReportState {
            cache_manager: Arc::clone(&cache_manager),
            producer: Arc::clone(&producer),
        })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

        let mut admin_app = CacheAdminRouter::create_router(CacheAdminState {
            cache_manager: Arc::clone(&cache_manager),
            producer,
            publisher,
        })
        .route("/health", get(liveness));

        if let Some(handle) = metrics {
            admin_app = admin_app.merge(metrics_router(handle));
        }

        let admin_app = admin_app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

        Self {
            config,
            cache_manager,
            report_app,
            admin_app,
            invalidation_worker,
        }
    }

    pub fn cache_manager(&self) -> Arc<CacheManager> {
        Arc::clone(&self.cache_manager)
    }

    /// Router serving `/reports/...`
    pub fn report_app(&self) -> Router {
        self.report_app.clone()
    }

    /// Router serving `/cache/...`, `/metrics` and `/health`
    pub fn admin_app(&self) -> Router {
        self.admin_app.clone()
    }

    pub fn bind_addr(&self) -> ServiceResult<SocketAddr> {
        socket_addr(&self.config.server.bind_address, self.config.server.port)
    }

    pub fn admin_bind_addr(&self) -> ServiceResult<SocketAddr> {
        socket_addr(&self.config.server.bind_address, self.config.server.admin_port)
    }

    /// Serve both listeners until `shutdown` resolves, then drain the invalidation queue
    pub async fn run<F>(self, shutdown: F) -> ServiceResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let report_addr = self.bind_addr()?;
        let admin_addr = self.admin_bind_addr()?;

        let report_listener = TcpListener::bind(report_addr).await.map_err(|e| {
            ServiceError::internal(format!("Failed to bind report server to {}: {}", report_addr, e))
        })?;
        let admin_listener = TcpListener::bind(admin_addr).await.map_err(|e| {
            ServiceError::internal(format!("Failed to bind admin server to {}: {}", admin_addr, e))
        })?;

        info!(addr = %report_addr, "Report server listening");
        info!(addr = %admin_addr, "Admin server listening");

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });

        let report_server = axum::serve(report_listener, self.report_app)
            .with_graceful_shutdown(wait_for_stop(stop_rx.clone()))
            .into_future();
        let admin_server = axum::serve(admin_listener, self.admin_app)
            .with_graceful_shutdown(wait_for_stop(stop_rx))
            .into_future();

        let (report_result, admin_result) = tokio::join!(report_server, admin_server);
        report_result
            .map_err(|e| ServiceError::internal(format!("Report server error: {}", e)))?;
        admin_result.map_err(|e| ServiceError::internal(format!("Admin server error: {}", e)))?;

        // The routers owned the last publishers, so the worker sees a closed queue now.
        match tokio::time::timeout(DRAIN_TIMEOUT, self.invalidation_worker).await {
            Ok(Ok(())) => info!("Invalidation worker drained"),
            Ok(Err(e)) => error!(error = %e, "Invalidation worker panicked"),
            Err(_) => warn!(
                timeout = ?DRAIN_TIMEOUT,
                "Invalidation worker did not drain in time, pending events dropped"
            ),
        }

        Ok(())
    }
}

/// Construct the configured cache backend
pub async fn build_store(config: &CacheConfig) -> ServiceResult<Arc<dyn CacheStore>> {
    match config.backend {
        CacheBackend::Memory => {
            info!(max_entries = config.memory.max_entries, "Using in-memory cache backend");
            Ok(Arc::new(InMemoryCache::new(config.memory.clone())))
        }
        CacheBackend::Redis => {
            info!(url = %config.redis.url, "Using Redis cache backend");
            let store = RedisCache::new(config.redis.clone()).await.map_err(|e| {
                ServiceError::config(format!("Failed to connect to Redis: {}", e))
            })?;
            Ok(Arc::new(store))
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn wait_for_stop(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

fn socket_addr(bind_address: &str, port: u16) -> ServiceResult<SocketAddr> {
    format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| ServiceError::config(format!("Invalid bind address {}: {}", bind_address, e)))
}
