//! Report cache service entry point.

use report_cache::observability::{init_logging, install_recorder};
use report_cache::server::shutdown_signal;
use report_cache::{ReportCacheServer, ServiceConfig, ServiceResult};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Report cache failed");
        eprintln!("report-cache: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> ServiceResult<()> {
    let config = ServiceConfig::load().await?;
    init_logging(&config.observability);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting report cache");

    let metrics = if config.observability.metrics_enabled {
        Some(install_recorder()?)
    } else {
        None
    };

    let server = ReportCacheServer::new(config, metrics).await?;
    info!(
        reports = %server.bind_addr()?,
        admin = %server.admin_bind_addr()?,
        "Report cache ready"
    );

    server.run(shutdown_signal()).await?;

    info!("Report cache shutdown complete");
    Ok(())
}
