//! # Report Model
//!
//! Typed identities for cached reports: the report category, the report identity
//! (category + entity), the requester a report is scoped to, and the filter set.

use super::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Longest accepted identity segment, in bytes
pub const MAX_SEGMENT_LEN: usize = 128;

/// Sentinel requester segment used for reports that are not personalized
pub const GLOBAL_REQUESTER: &str = "~global";

/// Filter key reserved for the requester when a request is forwarded upstream
pub const REQUESTER_FILTER_KEY: &str = "requester";

/// Validate one identity segment (category name, entity id or requester id).
///
/// Segments end up inside cache keys and glob patterns, so separators, whitespace
/// and glob metacharacters are rejected.
pub fn validate_segment(field: &str, value: &str) -> CacheResult<()> {
    if value.is_empty() {
        return Err(CacheError::invalid_identity(format!("{} must not be empty", field)));
    }

    if value.len() > MAX_SEGMENT_LEN {
        return Err(CacheError::invalid_identity(format!(
            "{} exceeds {} bytes",
            field, MAX_SEGMENT_LEN
        )));
    }

    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));

    if !valid {
        return Err(CacheError::invalid_identity(format!(
            "{} '{}' contains unsupported characters",
            field, value
        )));
    }

    Ok(())
}

/// Category of a report; drives TTL resolution and cascade invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReportCategory {
    Progress,
    Distribution,
    Analytics,
    Custom,
    /// Any category without a dedicated entry
    Other(String),
}

impl ReportCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ReportCategory::Progress => "progress",
            ReportCategory::Distribution => "distribution",
            ReportCategory::Analytics => "analytics",
            ReportCategory::Custom => "custom",
            ReportCategory::Other(name) => name,
        }
    }

    /// All categories with a dedicated entry
    pub fn known() -> [ReportCategory; 4] {
        [
            ReportCategory::Progress,
            ReportCategory::Distribution,
            ReportCategory::Analytics,
            ReportCategory::Custom,
        ]
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportCategory {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        validate_segment("category", &normalized)?;

        Ok(match normalized.as_str() {
            "progress" => ReportCategory::Progress,
            "distribution" => ReportCategory::Distribution,
            "analytics" => ReportCategory::Analytics,
            "custom" => ReportCategory::Custom,
            _ => ReportCategory::Other(normalized),
        })
    }
}

impl Serialize for ReportCategory {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReportCategory {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A kind of report plus the entity it concerns, rendered `category:entity_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportIdentity {
    pub category: ReportCategory,
    pub entity_id: String,
}

impl ReportIdentity {
    pub fn new(category: ReportCategory, entity_id: impl Into<String>) -> CacheResult<Self> {
        let entity_id = entity_id.into();
        validate_segment("entity id", &entity_id)?;
        Ok(Self { category, entity_id })
    }
}

impl fmt::Display for ReportIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.entity_id)
    }
}

impl FromStr for ReportIdentity {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, entity_id) = s.split_once(':').ok_or_else(|| {
            CacheError::invalid_identity(format!(
                "report identity '{}' must have the form category:entity",
                s
            ))
        })?;

        ReportIdentity::new(category.parse()?, entity_id)
    }
}

/// Whom a report is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequesterIdentity {
    User(String),
    Global,
}

impl RequesterIdentity {
    pub fn user(id: impl Into<String>) -> CacheResult<Self> {
        let id = id.into();
        validate_segment("requester id", &id)?;
        Ok(RequesterIdentity::User(id))
    }

    /// Treat a missing requester as a global report
    pub fn from_optional(id: Option<&str>) -> CacheResult<Self> {
        match id.map(str::trim) {
            None | Some("") => Ok(RequesterIdentity::Global),
            Some(GLOBAL_REQUESTER) => Ok(RequesterIdentity::Global),
            Some(id) => RequesterIdentity::user(id),
        }
    }

    /// Key segment for this requester
    pub fn segment(&self) -> &str {
        match self {
            RequesterIdentity::User(id) => id,
            RequesterIdentity::Global => GLOBAL_REQUESTER,
        }
    }
}

impl fmt::Display for RequesterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// Filter pairs applied to a report; ordering never matters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet(BTreeMap<String, String>);

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Pairs in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FilterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<HashMap<String, String>> for FilterSet {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

/// The unit the orchestrator, warmer and producer operate on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub identity: ReportIdentity,
    pub requester: RequesterIdentity,
    pub filters: FilterSet,
}

impl ReportRequest {
    pub fn new(identity: ReportIdentity, requester: RequesterIdentity, filters: FilterSet) -> Self {
        Self {
            identity,
            requester,
            filters,
        }
    }

    pub fn category(&self) -> &ReportCategory {
        &self.identity.category
    }
}
