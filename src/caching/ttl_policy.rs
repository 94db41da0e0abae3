//! # TTL Policy
//!
//! Maps report categories to freshness windows. Unknown categories fall back to the
//! default window; the table is fixed once the policy is built.

use super::types::ReportCategory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-category TTL configuration (`cache.ttl`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    #[serde(with = "humantime_serde")]
    pub progress: Duration,

    #[serde(with = "humantime_serde")]
    pub distribution: Duration,

    #[serde(with = "humantime_serde")]
    pub analytics: Duration,

    #[serde(with = "humantime_serde")]
    pub custom: Duration,

    /// Used for categories without a dedicated entry
    #[serde(with = "humantime_serde")]
    pub default: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            progress: Duration::from_secs(300),
            distribution: Duration::from_secs(900),
            analytics: Duration::from_secs(1800),
            custom: Duration::from_secs(3600),
            default: Duration::from_secs(600),
        }
    }
}

/// Immutable category to TTL lookup
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    table: TtlConfig,
}

impl TtlPolicy {
    pub fn new(config: TtlConfig) -> Self {
        Self { table: config }
    }

    /// Freshness window for a category
    pub fn resolve(&self, category: &ReportCategory) -> Duration {
        match category {
            ReportCategory::Progress => self.table.progress,
            ReportCategory::Distribution => self.table.distribution,
            ReportCategory::Analytics => self.table.analytics,
            ReportCategory::Custom => self.table.custom,
            ReportCategory::Other(_) => self.table.default,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.table.default
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(TtlConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.resolve(&ReportCategory::Progress), Duration::from_secs(300));
        assert_eq!(policy.resolve(&ReportCategory::Distribution), Duration::from_secs(900));
        assert_eq!(policy.resolve(&ReportCategory::Analytics), Duration::from_secs(1800));
        assert_eq!(policy.resolve(&ReportCategory::Custom), Duration::from_secs(3600));
    }

    #[test]
    fn test_unknown_category_uses_default() {
        let policy = TtlPolicy::default();
        let ttl = policy.resolve(&ReportCategory::Other("attendance".to_string()));
        assert_eq!(ttl, Duration::from_secs(600));
        assert_eq!(ttl, policy.default_ttl());
    }

    #[test]
    fn test_partial_yaml_override() {
        let config: TtlConfig = serde_yaml::from_str("progress: 1m\ndefault: 2m\n").unwrap();
        let policy = TtlPolicy::new(config);

        assert_eq!(policy.resolve(&ReportCategory::Progress), Duration::from_secs(60));
        assert_eq!(policy.resolve(&ReportCategory::Analytics), Duration::from_secs(1800));
        assert_eq!(
            policy.resolve(&ReportCategory::Other("x".to_string())),
            Duration::from_secs(120)
        );
    }
}
