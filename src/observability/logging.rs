//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. Output is JSON or human-readable depending
//! on `observability.log_format`; `RUST_LOG`, when set, takes precedence over the
//! configured level.

use crate::core::config::{LogFormat, ObservabilityConfig};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Filter from `RUST_LOG`, or the configured level when it is absent or unparsable
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber. A second call logs a warning and leaves the first in place.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = env_filter(&config.log_level);

    let result = match config.log_format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return;
    }

    info!(
        level = %config.log_level,
        format = ?config.log_format,
        "Structured logging initialized"
    );
}
