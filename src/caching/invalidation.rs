//! # Cache Invalidation
//!
//! Domain change events are mapped to groups of report keys through a single declarative
//! [`CascadeTable`] and purged from the store. Publishing never blocks the caller: events
//! go onto a bounded queue drained by a background worker, and failed deletions are retried
//! a bounded number of times before being dropped. A dropped deletion leaves the entry
//! stale until its TTL elapses.

use super::key_codec::KeyScope;
use super::stats::StatsCollector;
use super::stores::GuardedStore;
use super::types::{validate_segment, ReportCategory, RequesterIdentity};
use super::{CacheError, CacheResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A domain change reported by an external collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    pub event_type: String,
    pub subject_id: String,
    #[serde(default)]
    pub affected_categories: Vec<ReportCategory>,
}

impl InvalidationEvent {
    pub fn new(event_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            subject_id: subject_id.into(),
            affected_categories: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: ReportCategory) -> Self {
        self.affected_categories.push(category);
        self
    }
}

/// How much of a category an event purges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeScope {
    /// Keys whose entity or requester is the event subject
    Subject,
    /// Every key of the category
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeRule {
    pub category: ReportCategory,
    pub scope: CascadeScope,
}

impl CascadeRule {
    pub fn subject(category: ReportCategory) -> Self {
        Self {
            category,
            scope: CascadeScope::Subject,
        }
    }

    pub fn category(category: ReportCategory) -> Self {
        Self {
            category,
            scope: CascadeScope::Category,
        }
    }
}

/// Event type to affected report categories.
///
/// Review this table whenever a report category starts reading from a new data source
/// or a new domain event is introduced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeTable {
    rules: HashMap<String, Vec<CascadeRule>>,
}

impl Default for CascadeTable {
    fn default() -> Self {
        use ReportCategory::*;

        let graded = vec![
            CascadeRule::subject(Progress),
            CascadeRule::subject(Analytics),
            CascadeRule::category(Distribution),
        ];

        let mut rules = HashMap::new();
        rules.insert("grade_changed".to_string(), graded.clone());
        rules.insert("submission_graded".to_string(), graded);
        rules.insert(
            "progress_updated".to_string(),
            vec![CascadeRule::subject(Progress), CascadeRule::subject(Analytics)],
        );
        rules.insert(
            "enrollment_changed".to_string(),
            vec![
                CascadeRule::subject(Progress),
                CascadeRule::category(Distribution),
                CascadeRule::subject(Custom),
            ],
        );

        Self { rules }
    }
}

impl CascadeTable {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Replace the rules for the given event types
    pub fn with_overrides(mut self, overrides: HashMap<String, Vec<CascadeRule>>) -> Self {
        for (event_type, rules) in overrides {
            self.rules.insert(normalize_event_type(&event_type), rules);
        }
        self
    }

    pub fn rules_for(&self, event_type: &str) -> &[CascadeRule] {
        self.rules
            .get(&normalize_event_type(event_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Categories to purge for an event, with the broader scope winning on overlap
    pub fn resolve(&self, event: &InvalidationEvent) -> BTreeMap<ReportCategory, CascadeScope> {
        let mut resolved = BTreeMap::new();

        let from_event = event
            .affected_categories
            .iter()
            .cloned()
            .map(CascadeRule::subject);

        for rule in self.rules_for(&event.event_type).iter().cloned().chain(from_event) {
            resolved
                .entry(rule.category)
                .and_modify(|scope: &mut CascadeScope| *scope = (*scope).max(rule.scope))
                .or_insert(rule.scope);
        }

        resolved
    }
}

fn normalize_event_type(event_type: &str) -> String {
    event_type.trim().to_ascii_lowercase()
}

/// A group of keys to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionTarget {
    Prefix(String),
    Pattern(String),
}

impl DeletionTarget {
    fn from_scope(scope: &KeyScope) -> CacheResult<Self> {
        scope.validate()?;
        Ok(match scope.prefix() {
            Some(prefix) => DeletionTarget::Prefix(prefix),
            None => DeletionTarget::Pattern(scope.pattern()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeletionTarget::Prefix(prefix) => prefix,
            DeletionTarget::Pattern(pattern) => pattern,
        }
    }
}

/// Invalidation settings (`cache.invalidation`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Pending events held before new ones are dropped
    pub queue_capacity: usize,

    /// Retries per failed deletion before it is dropped
    pub max_retries: u32,

    /// Base delay between retries, multiplied by the attempt number
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Per-event-type replacements for the default cascade rules
    pub cascade: HashMap<String, Vec<CascadeRule>>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_retries: 3,
            retry_delay: Duration::from_millis(50),
            cascade: HashMap::new(),
        }
    }
}

/// Outcome of handling one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    pub event_id: Uuid,
    pub event_type: String,
    pub subject_id: String,
    pub patterns: Vec<String>,
    pub deleted: u64,
    pub failed_patterns: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed_patterns.is_empty()
    }
}

/// Maps events to key groups and purges them
pub struct InvalidationDispatcher {
    store: GuardedStore,
    stats: Arc<StatsCollector>,
    table: CascadeTable,
    config: InvalidationConfig,
    reports: broadcast::Sender<InvalidationReport>,
}

impl InvalidationDispatcher {
    pub fn new(store: GuardedStore, stats: Arc<StatsCollector>, config: InvalidationConfig) -> Self {
        let table = CascadeTable::default().with_overrides(config.cascade.clone());
        let (reports, _) = broadcast::channel(256);

        Self {
            store,
            stats,
            table,
            config,
            reports,
        }
    }

    pub fn with_table(mut self, table: CascadeTable) -> Self {
        self.table = table;
        self
    }

    pub fn table(&self) -> &CascadeTable {
        &self.table
    }

    /// Receive a report for every processed event
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationReport> {
        self.reports.subscribe()
    }

    /// Key groups an event purges; fails if a resolved category is not a valid key segment
    pub fn targets(&self, event: &InvalidationEvent) -> CacheResult<Vec<DeletionTarget>> {
        let subject = event.subject_id.trim();
        let mut targets = Vec::new();

        for (category, scope) in self.table.resolve(event) {
            match scope {
                CascadeScope::Category => {
                    targets.push(DeletionTarget::from_scope(&KeyScope::category(category))?);
                }
                CascadeScope::Subject => {
                    let by_entity = KeyScope::category(category.clone()).with_entity(subject);
                    let by_requester = KeyScope {
                        category: Some(category),
                        entity_id: None,
                        requester: Some(RequesterIdentity::User(subject.to_string())),
                    };
                    targets.push(DeletionTarget::from_scope(&by_entity)?);
                    targets.push(DeletionTarget::from_scope(&by_requester)?);
                }
            }
        }

        Ok(targets)
    }

    /// Handle one event inline
    #[instrument(skip(self, event), fields(event_type = %event.event_type, subject = %event.subject_id))]
    pub async fn process(&self, event: InvalidationEvent) -> CacheResult<InvalidationReport> {
        if let Err(e) = validate_segment("subject id", event.subject_id.trim()) {
            self.stats.record_dropped_event();
            warn!(error = %e, "Rejected invalidation event");
            return Err(e);
        }

        let targets = match self.targets(&event) {
            Ok(targets) => targets,
            Err(e) => {
                self.stats.record_dropped_event();
                warn!(error = %e, "Rejected invalidation event");
                return Err(e);
            }
        };

        let event_id = Uuid::new_v4();

        if targets.is_empty() {
            debug!(event_id = %event_id, "No cascade rules for event");
        }

        let mut deleted = 0;
        let mut failed_patterns = Vec::new();

        for target in &targets {
            match self.delete_with_retry(target).await {
                Ok(count) => deleted += count,
                Err(e) => {
                    self.stats.record_invalidation_failure();
                    warn!(
                        event_id = %event_id,
                        pattern = target.as_str(),
                        error = %e,
                        "Dropping invalidation after retries"
                    );
                    failed_patterns.push(target.as_str().to_string());
                }
            }
        }

        self.stats.record_invalidated(deleted);

        let patterns: Vec<String> = targets.iter().map(|t| t.as_str().to_string()).collect();

        if !failed_patterns.is_empty() {
            let partial = CacheError::InvalidationPartialFailure {
                failed: failed_patterns.len(),
                total: patterns.len(),
                patterns: failed_patterns.clone(),
            };
            warn!(event_id = %event_id, deleted, error = %partial, "Invalidation partially failed");
        } else {
            info!(event_id = %event_id, deleted, patterns = patterns.len(), "Invalidation event processed");
        }

        let report = InvalidationReport {
            event_id,
            event_type: event.event_type,
            subject_id: event.subject_id,
            patterns,
            deleted,
            failed_patterns,
            processed_at: Utc::now(),
        };

        // No subscribers is fine
        let _ = self.reports.send(report.clone());
        Ok(report)
    }

    async fn delete_with_retry(&self, target: &DeletionTarget) -> CacheResult<u64> {
        let mut attempt = 0;

        loop {
            let result = match target {
                DeletionTarget::Prefix(prefix) => self.store.delete_by_prefix(prefix).await,
                DeletionTarget::Pattern(pattern) => self.store.delete_matching(pattern).await,
            };

            match result {
                Ok(count) => return Ok(count),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(pattern = target.as_str(), attempt, error = %e, "Retrying invalidation");
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Start the background worker; it stops once every publisher is dropped
    pub fn spawn(self: Arc<Self>) -> (InvalidationPublisher, JoinHandle<()>) {
        let (publisher, mut receiver) =
            InvalidationPublisher::channel(self.config.queue_capacity, Arc::clone(&self.stats));

        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                // Failures are logged and counted inside `process`
                let _ = self.process(event).await;
            }
            debug!("Invalidation worker stopped");
        });

        (publisher, handle)
    }
}

/// Non-blocking handle for submitting events
#[derive(Clone)]
pub struct InvalidationPublisher {
    sender: mpsc::Sender<InvalidationEvent>,
    stats: Arc<StatsCollector>,
}

impl InvalidationPublisher {
    fn channel(
        capacity: usize,
        stats: Arc<StatsCollector>,
    ) -> (Self, mpsc::Receiver<InvalidationEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, stats }, receiver)
    }

    /// Queue an event; returns false when it had to be dropped
    pub fn publish(&self, event: InvalidationEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.record_dropped_event();
                warn!(
                    event_type = %event.event_type,
                    subject = %event.subject_id,
                    "Invalidation queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.stats.record_dropped_event();
                warn!(
                    event_type = %event.event_type,
                    subject = %event.subject_id,
                    "Invalidation worker stopped, dropping event"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::guarded::test_support::BrokenStore;
    use crate::caching::stores::{CacheEntry, InMemoryCache, InMemoryCacheConfig};
    use bytes::Bytes;

    fn memory_dispatcher(config: InvalidationConfig) -> (InvalidationDispatcher, GuardedStore) {
        let stats = Arc::new(StatsCollector::new());
        let store = GuardedStore::new(
            Arc::new(InMemoryCache::new(InMemoryCacheConfig::default())),
            Arc::clone(&stats),
        );
        (InvalidationDispatcher::new(store.clone(), stats, config), store)
    }

    async fn seed(store: &GuardedStore, keys: &[&str]) {
        for key in keys {
            let entry = CacheEntry::new(Bytes::from_static(b"v"), "fp".to_string(), Duration::from_secs(60));
            assert!(store.set(key, &entry, Duration::from_secs(60)).await);
        }
    }

    #[test]
    fn test_default_cascade_for_grade_change() {
        let table = CascadeTable::default();
        let resolved = table.resolve(&InvalidationEvent::new("grade_changed", "student-42"));

        assert_eq!(resolved.get(&ReportCategory::Progress), Some(&CascadeScope::Subject));
        assert_eq!(resolved.get(&ReportCategory::Analytics), Some(&CascadeScope::Subject));
        assert_eq!(resolved.get(&ReportCategory::Distribution), Some(&CascadeScope::Category));
        assert_eq!(resolved.get(&ReportCategory::Custom), None);
    }

    #[test]
    fn test_broader_scope_wins() {
        let table = CascadeTable::default();
        let event = InvalidationEvent::new("GRADE_CHANGED", "student-42")
            .with_category(ReportCategory::Distribution)
            .with_category(ReportCategory::Custom);
        let resolved = table.resolve(&event);

        assert_eq!(resolved.get(&ReportCategory::Distribution), Some(&CascadeScope::Category));
        assert_eq!(resolved.get(&ReportCategory::Custom), Some(&CascadeScope::Subject));
    }

    #[test]
    fn test_unknown_event_uses_only_listed_categories() {
        let table = CascadeTable::default();
        let event = InvalidationEvent::new("badge_awarded", "student-7")
            .with_category(ReportCategory::Other("badges".to_string()));
        let resolved = table.resolve(&event);

        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved.get(&ReportCategory::Other("badges".to_string())),
            Some(&CascadeScope::Subject)
        );
    }

    #[test]
    fn test_overrides_replace_rules() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "Grade_Changed".to_string(),
            vec![CascadeRule::category(ReportCategory::Progress)],
        );
        let table = CascadeTable::default().with_overrides(overrides);

        assert_eq!(
            table.rules_for("grade_changed"),
            &[CascadeRule::category(ReportCategory::Progress)]
        );
        assert_eq!(table.rules_for("submission_graded").len(), 3);
    }

    #[test]
    fn test_event_json_shape() {
        let event: InvalidationEvent = serde_json::from_str(
            r#"{"eventType":"grade_changed","subjectId":"student-42","affectedCategories":["progress"]}"#,
        )
        .unwrap();
        assert_eq!(event.affected_categories, vec![ReportCategory::Progress]);

        let event: InvalidationEvent =
            serde_json::from_str(r#"{"eventType":"progress_updated","subjectId":"s1"}"#).unwrap();
        assert!(event.affected_categories.is_empty());
    }

    #[tokio::test]
    async fn test_targets_for_subject_scope() {
        let (dispatcher, _) = memory_dispatcher(InvalidationConfig::default());
        let event = InvalidationEvent::new("progress_updated", "student-42");
        let targets = dispatcher.targets(&event).unwrap();

        assert!(targets.contains(&DeletionTarget::Prefix("report:progress:student-42:".to_string())));
        assert!(targets.contains(&DeletionTarget::Pattern("report:progress:*:student-42:*".to_string())));
        assert!(targets.contains(&DeletionTarget::Prefix("report:analytics:student-42:".to_string())));
        assert_eq!(targets.len(), 4);
    }

    #[tokio::test]
    async fn test_event_without_rules_or_categories_purges_nothing() {
        let (dispatcher, store) = memory_dispatcher(InvalidationConfig::default());
        let dispatcher = dispatcher.with_table(CascadeTable::empty());
        seed(&store, &["report:progress:math-101:student-42:d"]).await;

        let event = InvalidationEvent::new("grade_changed", "student-42");
        assert!(dispatcher.table().rules_for("grade_changed").is_empty());
        assert!(dispatcher.targets(&event).unwrap().is_empty());

        let report = dispatcher.process(event).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(report.is_complete());
        assert!(store.exists("report:progress:math-101:student-42:d").await);
    }

    #[tokio::test]
    async fn test_process_purges_cascaded_keys() {
        let (dispatcher, store) = memory_dispatcher(InvalidationConfig::default());
        seed(
            &store,
            &[
                "report:progress:math-101:student-42:d",
                "report:progress:math-101:student-7:d",
                "report:progress:student-42:~global:d",
                "report:analytics:term-1:student-42:d",
                "report:distribution:math-101:~global:d",
                "report:custom:student-42:student-42:d",
            ],
        )
        .await;

        let report = dispatcher
            .process(InvalidationEvent::new("grade_changed", "student-42"))
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.deleted, 4);
        assert!(store.exists("report:progress:math-101:student-7:d").await);
        assert!(store.exists("report:custom:student-42:student-42:d").await);
        assert!(!store.exists("report:distribution:math-101:~global:d").await);
    }

    #[tokio::test]
    async fn test_invalid_subject_is_rejected() {
        let (dispatcher, store) = memory_dispatcher(InvalidationConfig::default());
        seed(&store, &["report:progress:a:b:d"]).await;

        let err = dispatcher
            .process(InvalidationEvent::new("grade_changed", "*"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidIdentity { .. }));
        assert!(store.exists("report:progress:a:b:d").await);
        assert_eq!(dispatcher.stats.snapshot().dropped_events, 1);
    }

    #[tokio::test]
    async fn test_glob_category_is_rejected() {
        let (dispatcher, store) = memory_dispatcher(InvalidationConfig::default());
        let dispatcher = dispatcher.with_table(CascadeTable::empty());
        seed(
            &store,
            &[
                "report:progress:math-101:student-42:d",
                "report:analytics:student-42:~global:d",
            ],
        )
        .await;

        let event = InvalidationEvent::new("grade_changed", "student-42")
            .with_category(ReportCategory::Other("*".to_string()));
        assert!(dispatcher.targets(&event).is_err());

        let err = dispatcher.process(event).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidIdentity { .. }));
        assert!(store.exists("report:progress:math-101:student-42:d").await);
        assert!(store.exists("report:analytics:student-42:~global:d").await);
        assert_eq!(dispatcher.stats.snapshot().dropped_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deletions_are_retried_then_dropped() {
        let stats = Arc::new(StatsCollector::new());
        let store = GuardedStore::new(Arc::new(BrokenStore::failing()), Arc::clone(&stats));
        let config = InvalidationConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let dispatcher = InvalidationDispatcher::new(store, Arc::clone(&stats), config);

        let started = tokio::time::Instant::now();
        let report = dispatcher
            .process(InvalidationEvent::new("progress_updated", "student-42"))
            .await
            .unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failed_patterns.len(), 4);
        assert_eq!(report.deleted, 0);
        assert_eq!(stats.snapshot().invalidation_failures, 4);
        // 10ms + 20ms of backoff per pattern
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_worker_processes_published_events() {
        let (dispatcher, store) = memory_dispatcher(InvalidationConfig::default());
        seed(&store, &["report:progress:math-101:student-42:d"]).await;

        let dispatcher = Arc::new(dispatcher);
        let mut reports = dispatcher.subscribe();
        let (publisher, handle) = Arc::clone(&dispatcher).spawn();

        assert!(publisher.publish(InvalidationEvent::new("progress_updated", "student-42")));
        let report = reports.recv().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!store.exists("report:progress:math-101:student-42:d").await);

        drop(publisher);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_events() {
        let stats = Arc::new(StatsCollector::new());
        let (publisher, _receiver) = InvalidationPublisher::channel(1, Arc::clone(&stats));

        assert!(publisher.publish(InvalidationEvent::new("grade_changed", "s1")));
        assert!(!publisher.publish(InvalidationEvent::new("grade_changed", "s2")));
        assert_eq!(stats.snapshot().dropped_events, 1);
    }

    #[tokio::test]
    async fn test_closed_queue_drops_events() {
        let stats = Arc::new(StatsCollector::new());
        let (publisher, receiver) = InvalidationPublisher::channel(4, Arc::clone(&stats));
        drop(receiver);

        assert!(!publisher.publish(InvalidationEvent::new("grade_changed", "s1")));
        assert_eq!(stats.snapshot().dropped_events, 1);
    }
}
