//! # Configuration Management
//!
//! Service configuration is read from YAML, then environment variables prefixed with
//! `REPORT_CACHE_` are applied on top, then the result is validated. A missing file is
//! not an error: every section has defaults suitable for local development.
//!
//! ```yaml
//! server:
//!   port: 8080
//!   admin_port: 9090
//! cache:
//!   backend: redis
//!   redis:
//!     url: redis://cache:6379
//!   ttl:
//!     progress: 5m
//!     analytics: 30m
//! producer:
//!   base_url: http://reports:8000
//! ```

use crate::caching::{
    CacheManagerConfig, InMemoryCacheConfig, InvalidationConfig, ProducerConfig,
    RedisCacheConfig,
};
use crate::core::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "REPORT_CACHE_CONFIG_PATH";

/// Used when `REPORT_CACHE_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/report-cache.yaml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub producer: ProducerConfig,
    pub observability: ObservabilityConfig,
}

impl ServiceConfig {
    /// Load from `REPORT_CACHE_CONFIG_PATH` (or the default path), falling back to
    /// defaults when the file does not exist
    pub async fn load() -> ServiceResult<Self> {
        let path = env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Self::load_from_file(&path).await;
        }

        info!(path = %path.display(), "Configuration file not found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| ServiceError::config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_yaml(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without applying overrides or validating
    pub fn from_yaml(content: &str) -> ServiceResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ServiceError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply `REPORT_CACHE_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> ServiceResult<()> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> ServiceResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("REPORT_CACHE_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(port) = lookup("REPORT_CACHE_PORT") {
            self.server.port = parse_port("REPORT_CACHE_PORT", &port)?;
        }

        if let Some(port) = lookup("REPORT_CACHE_ADMIN_PORT") {
            self.server.admin_port = parse_port("REPORT_CACHE_ADMIN_PORT", &port)?;
        }

        if let Some(backend) = lookup("REPORT_CACHE_BACKEND") {
            self.cache.backend = match backend.to_lowercase().as_str() {
                "memory" => CacheBackend::Memory,
                "redis" => CacheBackend::Redis,
                other => {
                    return Err(ServiceError::config(format!(
                        "Invalid REPORT_CACHE_BACKEND: {}",
                        other
                    )))
                }
            };
        }

        if let Some(url) = lookup("REPORT_CACHE_REDIS_URL") {
            self.cache.redis.url = url;
        }

        if let Some(timeout) = lookup("REPORT_CACHE_OPERATION_TIMEOUT") {
            self.cache.manager.operation_timeout =
                parse_duration("REPORT_CACHE_OPERATION_TIMEOUT", &timeout)?;
        }

        if let Some(url) = lookup("REPORT_CACHE_PRODUCER_URL") {
            self.producer.base_url = url;
        }

        if let Some(timeout) = lookup("REPORT_CACHE_PRODUCER_TIMEOUT") {
            self.producer.timeout = parse_duration("REPORT_CACHE_PRODUCER_TIMEOUT", &timeout)?;
        }

        if let Some(level) = lookup("REPORT_CACHE_LOG_LEVEL") {
            self.observability.log_level = level.to_lowercase();
        }

        if let Some(format) = lookup("REPORT_CACHE_LOG_FORMAT") {
            self.observability.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                other => {
                    return Err(ServiceError::config(format!(
                        "Invalid REPORT_CACHE_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        if let Some(enabled) = lookup("REPORT_CACHE_METRICS_ENABLED") {
            self.observability.metrics_enabled = enabled.parse().map_err(|_| {
                ServiceError::config("Invalid REPORT_CACHE_METRICS_ENABLED, expected true or false")
            })?;
        }

        Ok(())
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> ServiceResult<()> {
        if self.server.port == 0 || self.server.admin_port == 0 {
            return Err(ServiceError::config("Ports must be non-zero"));
        }

        if self.server.port == self.server.admin_port {
            return Err(ServiceError::config(
                "Report and admin listeners must use different ports",
            ));
        }

        let ttl = &self.cache.manager.ttl;
        for (name, value) in [
            ("progress", ttl.progress),
            ("distribution", ttl.distribution),
            ("analytics", ttl.analytics),
            ("custom", ttl.custom),
            ("default", ttl.default),
        ] {
            if value.is_zero() {
                return Err(ServiceError::config(format!(
                    "cache.ttl.{} must be greater than zero",
                    name
                )));
            }
        }

        if self.cache.manager.operation_timeout.is_zero()
            || self.cache.manager.bulk_operation_timeout.is_zero()
        {
            return Err(ServiceError::config("Cache operation timeouts must be greater than zero"));
        }

        if self.cache.manager.warm_concurrency == 0 {
            return Err(ServiceError::config("cache.warm_concurrency must be at least 1"));
        }

        if self.cache.invalidation.queue_capacity == 0 {
            return Err(ServiceError::config(
                "cache.invalidation.queue_capacity must be at least 1",
            ));
        }

        match self.cache.backend {
            CacheBackend::Memory if self.cache.memory.max_entries == 0 => {
                return Err(ServiceError::config("cache.memory.max_entries must be at least 1"));
            }
            CacheBackend::Redis
                if !(self.cache.redis.url.starts_with("redis://")
                    || self.cache.redis.url.starts_with("rediss://")) =>
            {
                return Err(ServiceError::config(format!(
                    "Invalid Redis URL: {}",
                    self.cache.redis.url
                )));
            }
            _ => {}
        }

        if !(self.producer.base_url.starts_with("http://")
            || self.producer.base_url.starts_with("https://"))
        {
            return Err(ServiceError::config(format!(
                "Invalid producer base URL: {}",
                self.producer.base_url
            )));
        }

        if !LOG_LEVELS.contains(&self.observability.log_level.as_str()) {
            return Err(ServiceError::config(format!(
                "Invalid log level: {}",
                self.observability.log_level
            )));
        }

        Ok(())
    }
}

fn parse_port(name: &str, value: &str) -> ServiceResult<u16> {
    value
        .parse()
        .map_err(|_| ServiceError::config(format!("Invalid {}: {}", name, value)))
}

fn parse_duration(name: &str, value: &str) -> ServiceResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ServiceError::config(format!("Invalid {}: {}", name, e)))
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,

    /// Report traffic
    pub port: u16,

    /// Admin endpoints, metrics and liveness
    pub admin_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            admin_port: 9090,
        }
    }
}

/// Cache store selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

/// `cache` section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub memory: InMemoryCacheConfig,
    pub redis: RedisCacheConfig,
    pub invalidation: InvalidationConfig,

    /// `ttl`, timeouts and warm concurrency live directly under `cache`
    #[serde(flatten)]
    pub manager: CacheManagerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// `observability` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: true,
        }
    }
}
