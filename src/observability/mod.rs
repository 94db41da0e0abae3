//! Logging and metrics setup shared by the binary and the integration tests.

pub mod logging;
pub mod metrics;

pub use self::logging::init_logging;
pub use self::metrics::{install_recorder, metrics_router};
