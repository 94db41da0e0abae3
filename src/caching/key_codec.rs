//! # Cache Key Codec
//!
//! Deterministic encoding of a report request into a cache key of the form
//! `report:{category}:{entity}:{requester}:{filter_digest}`, plus the scope
//! patterns used to delete groups of keys.

use super::types::{
    validate_segment, FilterSet, ReportCategory, ReportRequest, RequesterIdentity,
    REQUESTER_FILTER_KEY,
};
use super::{CacheError, CacheResult};
use std::fmt;

/// Leading segment of every report key
pub const KEY_NAMESPACE: &str = "report";

/// Filter digest width in bytes (128 bits)
const DIGEST_BYTES: usize = 16;

/// Opaque cache key; used for lookups and diagnostics only
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A group of keys selected by any combination of category, entity and requester.
///
/// Unset fields match every value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyScope {
    pub category: Option<ReportCategory>,
    pub entity_id: Option<String>,
    pub requester: Option<RequesterIdentity>,
}

impl KeyScope {
    /// Every report key
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(category: ReportCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_requester(mut self, requester: RequesterIdentity) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.category.is_none() && self.entity_id.is_none() && self.requester.is_none()
    }

    fn segments(&self) -> [Option<String>; 3] {
        [
            self.category.as_ref().map(|c| c.as_str().to_string()),
            self.entity_id.clone(),
            self.requester.as_ref().map(|r| r.segment().to_string()),
        ]
    }

    /// Glob pattern (`*` wildcards) matching every key in scope
    pub fn pattern(&self) -> String {
        let mut pattern = String::from(KEY_NAMESPACE);
        for segment in self.segments() {
            pattern.push(':');
            pattern.push_str(segment.as_deref().unwrap_or("*"));
        }
        pattern.push_str(":*");
        pattern
    }

    /// Plain key prefix, available when no set field follows a wildcard
    pub fn prefix(&self) -> Option<String> {
        let segments = self.segments();
        let bound = segments.iter().take_while(|s| s.is_some()).count();

        if segments[bound..].iter().any(Option::is_some) {
            return None;
        }

        let mut prefix = format!("{}:", KEY_NAMESPACE);
        for segment in segments.iter().take(bound).flatten() {
            prefix.push_str(segment);
            prefix.push(':');
        }
        Some(prefix)
    }

    pub(crate) fn validate(&self) -> CacheResult<()> {
        if let Some(ReportCategory::Other(name)) = &self.category {
            validate_segment("category", name)?;
        }
        if let Some(entity_id) = &self.entity_id {
            validate_segment("entity id", entity_id)?;
        }
        if let Some(RequesterIdentity::User(id)) = &self.requester {
            validate_segment("requester id", id)?;
        }
        Ok(())
    }
}

/// Encodes report requests into cache keys
#[derive(Debug, Clone, Default)]
pub struct KeyCodec;

impl KeyCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode a request into its cache key, rejecting malformed identities
    pub fn encode(&self, request: &ReportRequest) -> CacheResult<CacheKey> {
        let identity = &request.identity;

        if let ReportCategory::Other(name) = &identity.category {
            validate_segment("category", name)?;
        }
        validate_segment("entity id", &identity.entity_id)?;
        if let RequesterIdentity::User(id) = &request.requester {
            validate_segment("requester id", id)?;
        }
        if request.filters.get(REQUESTER_FILTER_KEY).is_some() {
            return Err(CacheError::invalid_identity(format!(
                "filter key '{}' is reserved",
                REQUESTER_FILTER_KEY
            )));
        }

        Ok(CacheKey(format!(
            "{}:{}:{}:{}:{}",
            KEY_NAMESPACE,
            identity.category,
            identity.entity_id,
            request.requester.segment(),
            self.filter_digest(&request.filters)
        )))
    }

    /// Canonical form of a filter set: percent-encoded pairs sorted by key, joined with `&`
    pub fn canonical_filters(&self, filters: &FilterSet) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// 128-bit BLAKE3 digest of the canonical filter string, hex encoded
    pub fn filter_digest(&self, filters: &FilterSet) -> String {
        let canonical = self.canonical_filters(filters);
        let hash = blake3::hash(canonical.as_bytes());
        hex::encode(&hash.as_bytes()[..DIGEST_BYTES])
    }

    /// Validated glob pattern for a scope
    pub fn scope_pattern(&self, scope: &KeyScope) -> CacheResult<String> {
        scope.validate()?;
        Ok(scope.pattern())
    }
}
