//! # Report Routes
//!
//! `GET /reports/{category}/{entity_id}` served through the cache with conditional
//! request support. The requester comes from `X-Requester-Id` (absent means a global
//! report) and every query parameter is a report filter.

use super::cache_manager::CacheManager;
use super::conditional::{ConditionalRequestAdapter, ConditionalResponse};
use super::producer::ReportProducer;
use super::types::{FilterSet, ReportIdentity, ReportRequest, RequesterIdentity};
use crate::core::error::ServiceError;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;

pub const REQUESTER_HEADER: &str = "x-requester-id";

/// Shared state for report routes
#[derive(Clone)]
pub struct ReportState {
    pub cache_manager: Arc<CacheManager>,
    pub producer: Arc<dyn ReportProducer>,
}

/// Report router factory
pub struct ReportRouter;

impl ReportRouter {
    pub fn create_router(state: ReportState) -> Router {
        Router::new()
            .route("/reports/:category/:entity_id", get(get_report))
            .with_state(state)
    }
}

async fn get_report(
    State(state): State<ReportState>,
    Path((category, entity_id)): Path<(String, String)>,
    Query(filters): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<ConditionalResponse, ServiceError> {
    let requester = headers
        .get(REQUESTER_HEADER)
        .map(|value| {
            value.to_str().map_err(|_| ServiceError::InvalidIdentity {
                message: "requester header is not valid ASCII".to_string(),
            })
        })
        .transpose()?;

    let request = ReportRequest::new(
        ReportIdentity::new(category.parse()?, entity_id)?,
        RequesterIdentity::from_optional(requester)?,
        FilterSet::from(filters),
    );

    let outcome = state
        .cache_manager
        .get(&request, state.producer.as_ref())
        .await?;

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());

    Ok(ConditionalRequestAdapter::evaluate(outcome, if_none_match))
}
