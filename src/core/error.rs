//! # Error Handling Module
//!
//! Service-level errors and their HTTP mapping. The cache core reports failures as
//! [`CacheError`]; everything that crosses the HTTP boundary is converted into a
//! [`ServiceError`], which knows its status code and renders a structured JSON body:
//!
//! ```json
//! {"error": {"code": 400, "message": "...", "type": "invalid_identity", "retryable": false}}
//! ```
//!
//! Cache infrastructure trouble is never turned into a 5xx on the report path: the cache
//! manager falls through to the producer instead, so only producer failures and caller
//! errors reach this module from there.

use crate::caching::CacheError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the service
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error types for the report cache service
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    /// Configuration-related errors (invalid config, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Request validation errors (missing confirmation, bad parameters, etc.)
    #[error("Request validation failed: {field} - {reason}")]
    RequestValidation { field: String, reason: String },

    /// Missing or malformed report/requester identity
    #[error("Invalid identity: {message}")]
    InvalidIdentity { message: String },

    /// The upstream report producer failed
    #[error("Report producer failed: {message}")]
    ProducerFailure { message: String },

    /// Cache backend unreachable during an administrative operation
    #[error("Cache backend unavailable: {message}")]
    CacheUnavailable { message: String },

    /// Operation timeout
    #[error("Operation timed out")]
    Timeout,

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, listeners, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl ServiceError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a validation error for one request field
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, reason: S) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code returned to clients
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidIdentity { .. } => StatusCode::BAD_REQUEST,
            Self::ProducerFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::CacheUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a client may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProducerFailure { .. } | Self::CacheUnavailable { .. } | Self::Timeout
        )
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::InvalidIdentity { .. } => "invalid_identity",
            Self::ProducerFailure { .. } => "producer_failure",
            Self::CacheUnavailable { .. } => "cache_unavailable",
            Self::Timeout => "timeout",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidIdentity { message } => Self::InvalidIdentity { message },
            CacheError::InvalidScope { message } => Self::RequestValidation {
                field: "scope".to_string(),
                reason: message,
            },
            CacheError::ProducerFailure(e) => Self::ProducerFailure {
                message: e.to_string(),
            },
            CacheError::Timeout => Self::Timeout,
            CacheError::Configuration { message } => Self::Configuration { message },
            other if other.is_infrastructure() => Self::CacheUnavailable {
                message: other.to_string(),
            },
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ServiceError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
