//! # Conditional Requests
//!
//! Translates cache outcomes into HTTP validators: `ETag`, `Cache-Control` and
//! `If-None-Match` handling. The cache manager itself knows nothing about HTTP.

use super::cache_manager::ReportOutcome;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::time::Duration;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Response to a report request, before it is written to the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalResponse {
    /// The client's validator matches; no body is sent
    NotModified {
        fingerprint: String,
        ttl: Duration,
        from_cache: bool,
    },
    Fresh {
        payload: Bytes,
        fingerprint: String,
        ttl: Duration,
        from_cache: bool,
    },
}

impl ConditionalResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            ConditionalResponse::NotModified { .. } => StatusCode::NOT_MODIFIED,
            ConditionalResponse::Fresh { .. } => StatusCode::OK,
        }
    }

    fn parts(&self) -> (&str, Duration, bool) {
        match self {
            ConditionalResponse::NotModified {
                fingerprint,
                ttl,
                from_cache,
            }
            | ConditionalResponse::Fresh {
                fingerprint,
                ttl,
                from_cache,
                ..
            } => (fingerprint.as_str(), *ttl, *from_cache),
        }
    }

    /// Validator and freshness headers shared by 200 and 304 responses
    pub fn headers(&self) -> HeaderMap {
        let (fingerprint, ttl, from_cache) = self.parts();
        let mut headers = HeaderMap::new();

        if let Ok(etag) = HeaderValue::from_str(&ConditionalRequestAdapter::etag(fingerprint)) {
            headers.insert(header::ETAG, etag);
        }
        if let Ok(cache_control) =
            HeaderValue::from_str(&ConditionalRequestAdapter::cache_control(ttl))
        {
            headers.insert(header::CACHE_CONTROL, cache_control);
        }
        headers.insert(
            X_CACHE,
            HeaderValue::from_static(if from_cache { "HIT" } else { "MISS" }),
        );

        headers
    }
}

impl IntoResponse for ConditionalResponse {
    fn into_response(self) -> Response {
        let headers = self.headers();

        match self {
            ConditionalResponse::NotModified { .. } => {
                (StatusCode::NOT_MODIFIED, headers).into_response()
            }
            ConditionalResponse::Fresh { payload, .. } => {
                let mut headers = headers;
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                (StatusCode::OK, headers, payload).into_response()
            }
        }
    }
}

/// Boundary between cache outcomes and HTTP conditional requests
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalRequestAdapter;

impl ConditionalRequestAdapter {
    /// Decide between 304 and 200 for an outcome and the request's `If-None-Match`
    pub fn evaluate(outcome: ReportOutcome, if_none_match: Option<&str>) -> ConditionalResponse {
        let matched = if_none_match
            .map(|header| Self::matches(header, &outcome.fingerprint))
            .unwrap_or(false);

        if matched {
            ConditionalResponse::NotModified {
                fingerprint: outcome.fingerprint,
                ttl: outcome.ttl,
                from_cache: outcome.from_cache,
            }
        } else {
            ConditionalResponse::Fresh {
                payload: outcome.payload,
                fingerprint: outcome.fingerprint,
                ttl: outcome.ttl,
                from_cache: outcome.from_cache,
            }
        }
    }

    /// Weak comparison of an `If-None-Match` value against a fingerprint.
    ///
    /// Accepts `*`, comma-separated lists and `W/` prefixed validators.
    pub fn matches(if_none_match: &str, fingerprint: &str) -> bool {
        if_none_match.split(',').map(str::trim).any(|candidate| {
            if candidate == "*" {
                return true;
            }
            let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
            let candidate = candidate
                .strip_prefix('"')
                .and_then(|c| c.strip_suffix('"'))
                .unwrap_or(candidate);
            !candidate.is_empty() && candidate == fingerprint
        })
    }

    /// Strong entity tag for a fingerprint
    pub fn etag(fingerprint: &str) -> String {
        format!("\"{}\"", fingerprint)
    }

    pub fn cache_control(ttl: Duration) -> String {
        format!("max-age={}, must-revalidate", ttl.as_secs())
    }
}
