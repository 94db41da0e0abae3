//! # Report Cache
//!
//! A cache-aside layer for expensive analytical reports. Reports are produced by an
//! upstream service on a miss, stored under deterministic keys with per-category TTLs,
//! and invalidated asynchronously when domain events (grade changes, enrollment changes
//! and the like) make them stale.
//!
//! ## Modules
//! - [`caching`]: keys, TTLs, stores, the cache manager, invalidation and the HTTP routes
//! - [`core`]: configuration and service-level errors
//! - [`observability`]: tracing subscriber and Prometheus recorder setup
//! - [`server`]: the report and admin listeners

pub mod caching;
pub mod core;
pub mod observability;
pub mod server;

pub use crate::caching::{CacheError, CacheManager, CacheResult};
pub use crate::core::config::ServiceConfig;
pub use crate::core::error::{ServiceError, ServiceResult};
pub use crate::server::ReportCacheServer;
