//! # Report Producers
//!
//! The cache never builds reports itself; it asks a [`ReportProducer`] for a fresh payload
//! on every miss. Producers must be idempotent from the cache's point of view.

use super::types::{ReportCategory, ReportRequest, REQUESTER_FILTER_KEY};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Header an upstream producer may use to report the category it produced
pub const CATEGORY_HEADER: &str = "x-report-category";

/// A freshly produced report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedReport {
    pub payload: Bytes,
    pub category: ReportCategory,
}

impl ProducedReport {
    pub fn new(payload: impl Into<Bytes>, category: ReportCategory) -> Self {
        Self {
            payload: payload.into(),
            category,
        }
    }
}

/// Failures raised by a producer; propagated to the caller unchanged
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Report producer failed: {message}")]
    Failed { message: String },

    #[error("Upstream report service returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Upstream report service request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ProducerError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Source of fresh report payloads
#[async_trait]
pub trait ReportProducer: Send + Sync {
    async fn produce(&self, request: &ReportRequest) -> Result<ProducedReport, ProducerError>;
}

/// Adapts an async closure into a producer
pub struct FnProducer<F> {
    func: F,
}

impl<F, Fut> FnProducer<F>
where
    F: Fn(ReportRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProducedReport, ProducerError>> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> ReportProducer for FnProducer<F>
where
    F: Fn(ReportRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProducedReport, ProducerError>> + Send,
{
    async fn produce(&self, request: &ReportRequest) -> Result<ProducedReport, ProducerError> {
        (self.func)(request.clone()).await
    }
}

/// Upstream report service settings (`producer` config section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Base URL of the report-generation service
    pub base_url: String,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Fetches reports from the upstream service:
/// `GET {base_url}/reports/{category}/{entity_id}?requester=..&<filters>`
pub struct HttpReportProducer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReportProducer {
    pub fn new(config: &ProducerConfig) -> Result<Self, ProducerError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, request: &ReportRequest) -> String {
        format!(
            "{}/reports/{}/{}",
            self.base_url,
            urlencoding::encode(request.identity.category.as_str()),
            urlencoding::encode(&request.identity.entity_id)
        )
    }
}

#[async_trait]
impl ReportProducer for HttpReportProducer {
    async fn produce(&self, request: &ReportRequest) -> Result<ProducedReport, ProducerError> {
        if request.filters.get(REQUESTER_FILTER_KEY).is_some() {
            return Err(ProducerError::failed(format!(
                "filter key '{}' collides with the requester parameter",
                REQUESTER_FILTER_KEY
            )));
        }

        let mut query: Vec<(&str, &str)> = vec![(REQUESTER_FILTER_KEY, request.requester.segment())];
        query.extend(request.filters.iter());

        let url = self.url(request);
        debug!(url = %url, "Requesting report from upstream");

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProducerError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let category = response
            .headers()
            .get(CATEGORY_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or_else(|| request.identity.category.clone());

        let payload = response.bytes().await?;
        Ok(ProducedReport { payload, category })
    }
}
