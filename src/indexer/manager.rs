//! Indexer Manager
//!
//! The IndexerManager is responsible for:
//! - Building indexers from their stored definitions
//! - Fanning a search out across indexers, isolating failures per indexer
//! - Backing off indexers that keep failing or are rate limited
//! - Invalidating cached state when a definition changes

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::capabilities::IndexerCapabilities;
use super::definitions::{Indexer, IndexerDefinition, build_indexer};
use super::pipeline::IndexerPipeline;
use super::types::{ReleaseInfo, SearchCriteria};
use crate::error::{IndexerError, Result};

/// Back-off per escalation level
const ESCALATION_PERIODS: [Duration; 9] = [
    Duration::ZERO,
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(3 * 60 * 60),
    Duration::from_secs(6 * 60 * 60),
    Duration::from_secs(12 * 60 * 60),
    Duration::from_secs(24 * 60 * 60),
];

/// Outcome of one indexer's part of a search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSearchResult {
    pub indexer_id: String,
    pub indexer_name: String,
    pub releases: Vec<ReleaseInfo>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    /// Machine-readable error class ("auth", "rate_limited", "timeout", ...)
    pub error_kind: Option<String>,
}

impl IndexerSearchResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Failure history of one indexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub indexer_id: String,
    pub escalation_level: usize,
    pub initial_failure: Option<DateTime<Utc>>,
    pub most_recent_failure: Option<DateTime<Utc>>,
    pub disabled_until: Option<DateTime<Utc>>,
}

impl IndexerStatus {
    fn new(indexer_id: &str) -> Self {
        Self {
            indexer_id: indexer_id.to_string(),
            escalation_level: 0,
            initial_failure: None,
            most_recent_failure: None,
            disabled_until: None,
        }
    }

    pub fn is_disabled(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.is_some_and(|until| until > now)
    }

    /// Escalate and disable until the longer of the level's back-off and `minimum`
    fn record_failure(&mut self, now: DateTime<Utc>, minimum: Option<Duration>) {
        self.escalation_level = (self.escalation_level + 1).min(ESCALATION_PERIODS.len() - 1);
        self.initial_failure.get_or_insert(now);
        self.most_recent_failure = Some(now);

        let backoff = ESCALATION_PERIODS[self.escalation_level].max(minimum.unwrap_or(Duration::ZERO));
        self.disabled_until = chrono::Duration::from_std(backoff).ok().map(|b| now + b);
    }
}

/// What the status tracker needs to know about a failed call
#[derive(Debug, Clone, Copy, PartialEq)]
enum Failure {
    Cancelled,
    Failed { retry_after: Option<Duration> },
}

impl Failure {
    fn of(err: &IndexerError) -> Self {
        match err {
            IndexerError::Cancelled => Failure::Cancelled,
            other => Failure::Failed {
                retry_after: other.retry_after(),
            },
        }
    }
}

/// Manages all configured indexer instances
pub struct IndexerManager {
    pipeline: Arc<IndexerPipeline>,
    /// Loaded indexers by definition id
    indexers: RwLock<HashMap<String, Indexer>>,
    statuses: RwLock<HashMap<String, IndexerStatus>>,
    /// Bounds how many indexers are queried at once
    permits: Arc<Semaphore>,
}

impl IndexerManager {
    pub fn new(pipeline: Arc<IndexerPipeline>) -> Self {
        let permits = Arc::new(Semaphore::new(pipeline.config().max_concurrent_searches.max(1)));
        Self {
            pipeline,
            indexers: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            permits,
        }
    }

    pub fn pipeline(&self) -> &Arc<IndexerPipeline> {
        &self.pipeline
    }

    /// Load enabled definitions; returns the ones that failed to build
    pub fn load(&self, definitions: Vec<IndexerDefinition>) -> Vec<(String, IndexerError)> {
        let mut failures = vec![];

        for definition in definitions {
            if !definition.enabled {
                debug!(indexer_id = %definition.id, "Skipping disabled indexer");
                continue;
            }

            let id = definition.id.clone();
            if let Err(e) = self.upsert(definition) {
                warn!(indexer_id = %id, error = %e, "Failed to load indexer");
                failures.push((id, e));
            }
        }

        failures
    }

    /// Add or replace an indexer. Cached capabilities and session state of the
    /// previous definition are dropped.
    pub fn upsert(&self, definition: IndexerDefinition) -> Result<()> {
        let indexer = build_indexer(definition)?;
        let id = indexer.id().to_string();

        self.pipeline.invalidate(&id);
        info!(
            indexer_id = %id,
            indexer_name = %indexer.name(),
            implementation = %indexer.definition.implementation,
            "Loaded indexer"
        );
        self.indexers.write().insert(id, indexer);
        Ok(())
    }

    pub fn remove(&self, indexer_id: &str) -> bool {
        self.pipeline.invalidate(indexer_id);
        self.statuses.write().remove(indexer_id);
        self.indexers.write().remove(indexer_id).is_some()
    }

    pub fn get(&self, indexer_id: &str) -> Option<Indexer> {
        self.indexers.read().get(indexer_id).cloned()
    }

    /// All loaded indexers, ordered by name
    pub fn list(&self) -> Vec<Indexer> {
        let mut indexers: Vec<Indexer> = self.indexers.read().values().cloned().collect();
        indexers.sort_by(|a, b| a.name().cmp(b.name()));
        indexers
    }

    pub fn status(&self, indexer_id: &str) -> Option<IndexerStatus> {
        self.statuses.read().get(indexer_id).cloned()
    }

    pub fn statuses(&self) -> Vec<IndexerStatus> {
        self.statuses.read().values().cloned().collect()
    }

    pub async fn capabilities(&self, indexer_id: &str) -> Result<Arc<IndexerCapabilities>> {
        let indexer = self.require(indexer_id)?;
        self.pipeline.capabilities(&indexer).await
    }

    /// Search all indexers, or only `indexer_ids` when given. One result per
    /// indexer queried; indexers in back-off are skipped.
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
        indexer_ids: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Vec<IndexerSearchResult> {
        let now = Utc::now();
        let indexers: Vec<Indexer> = self
            .list()
            .into_iter()
            .filter(|idx| indexer_ids.is_none_or(|ids| ids.iter().any(|id| id == idx.id())))
            .filter(|idx| match self.status(idx.id()) {
                Some(status) if status.is_disabled(now) => {
                    debug!(
                        indexer_id = %idx.id(),
                        disabled_until = ?status.disabled_until,
                        "Temporarily ignoring indexer due to recent failures"
                    );
                    false
                }
                _ => true,
            })
            .collect();

        let timeout = self.pipeline.config().search_timeout;
        let mut handles = vec![];
        for indexer in indexers {
            let pipeline = self.pipeline.clone();
            let permits = self.permits.clone();
            let criteria = criteria.clone();
            let cancel = cancel.child_token();

            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                Self::search_single(pipeline, indexer, criteria, timeout, cancel).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            match joined {
                Ok((result, failure)) => {
                    self.record(&result.indexer_id, failure);
                    results.push(result);
                }
                Err(e) => {
                    error!(error = %e, "Indexer search task panicked");
                }
            }
        }

        results
    }

    async fn search_single(
        pipeline: Arc<IndexerPipeline>,
        indexer: Indexer,
        criteria: SearchCriteria,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> (IndexerSearchResult, Option<Failure>) {
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, pipeline.search(&indexer, &criteria, &cancel)).await;

        let (releases, failure, error, error_kind) = match outcome {
            Ok(Ok(releases)) => (releases, None, None, None),
            Ok(Err(e)) => (
                vec![],
                Some(Failure::of(&e)),
                Some(e.to_string()),
                Some(e.kind().to_string()),
            ),
            Err(_) => {
                cancel.cancel();
                pipeline.record_abandoned_search(&indexer, &criteria, start.elapsed());
                warn!(indexer_id = %indexer.id(), timeout_secs = timeout.as_secs(), "Search timed out");
                (
                    vec![],
                    Some(Failure::Failed { retry_after: None }),
                    Some(format!("search timed out after {}s", timeout.as_secs())),
                    Some("timeout".to_string()),
                )
            }
        };

        let result = IndexerSearchResult {
            indexer_id: indexer.id().to_string(),
            indexer_name: indexer.name().to_string(),
            releases,
            elapsed_ms: start.elapsed().as_millis() as u64,
            error,
            error_kind,
        };
        (result, failure)
    }

    /// Run the indexer's connection test
    pub async fn test(&self, indexer_id: &str) -> Result<usize> {
        let indexer = self.require(indexer_id)?;
        let result = self.pipeline.test(&indexer).await;
        self.record(indexer_id, result.as_ref().err().map(Failure::of));
        result
    }

    /// Download a release file with the indexer's credentials
    pub async fn download(&self, indexer_id: &str, link: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let indexer = self.require(indexer_id)?;
        debug!(indexer_id = %indexer_id, link = %link, "Downloading release via indexer");

        let result = self.pipeline.download(&indexer, link, cancel).await;
        if let Err(e @ IndexerError::RateLimited { .. }) = &result {
            self.record(indexer_id, Some(Failure::of(e)));
        }
        result
    }

    /// Download the file behind a release returned by [`Self::search`]
    pub async fn download_release(&self, release: &ReleaseInfo, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let link = release
            .download_url
            .as_deref()
            .or(release.magnet_uri.as_deref())
            .ok_or_else(|| IndexerError::NotSupported("release has no download link".to_string()))?;
        self.download(&release.indexer_id, link, cancel).await
    }

    fn require(&self, indexer_id: &str) -> Result<Indexer> {
        self.get(indexer_id)
            .ok_or_else(|| IndexerError::Config(format!("indexer not loaded: {}", indexer_id)))
    }

    fn record(&self, indexer_id: &str, failure: Option<Failure>) {
        let minimum = match failure {
            None => {
                if self.statuses.write().remove(indexer_id).is_some() {
                    info!(indexer_id = %indexer_id, "Indexer recovered");
                }
                return;
            }
            Some(Failure::Cancelled) => return,
            Some(Failure::Failed { retry_after }) => retry_after,
        };

        let mut statuses = self.statuses.write();
        let status = statuses
            .entry(indexer_id.to_string())
            .or_insert_with(|| IndexerStatus::new(indexer_id));
        status.record_failure(Utc::now(), minimum);
        warn!(
            indexer_id = %indexer_id,
            escalation_level = status.escalation_level,
            disabled_until = ?status.disabled_until,
            "Indexer failure recorded"
        );
    }
}

impl std::fmt::Debug for IndexerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerManager")
            .field("indexers_count", &self.indexers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpConfig, HttpDispatcher};
    use crate::indexer::events::NullEventSink;
    use crate::indexer::pipeline::PipelineConfig;
    use crate::indexer::session::MemorySettingsStore;
    use serde_json::json;

    fn manager() -> IndexerManager {
        let pipeline = IndexerPipeline::new(
            Arc::new(HttpDispatcher::new(&HttpConfig::default()).unwrap()),
            Arc::new(MemorySettingsStore::new()),
            Arc::new(NullEventSink),
            PipelineConfig::default(),
        );
        IndexerManager::new(Arc::new(pipeline))
    }

    fn definition(id: &str, name: &str, enabled: bool) -> IndexerDefinition {
        IndexerDefinition {
            id: id.to_string(),
            name: name.to_string(),
            implementation: "torznab".to_string(),
            protocol: None,
            enabled,
            tags: vec![],
            settings: json!({"base_url": "https://tracker.example"}),
        }
    }

    #[test]
    fn test_escalation_backoff() {
        let now = Utc::now();
        let mut status = IndexerStatus::new("x");

        status.record_failure(now, None);
        assert_eq!(status.escalation_level, 1);
        assert_eq!(status.disabled_until, Some(now + chrono::Duration::minutes(5)));

        for _ in 0..20 {
            status.record_failure(now, None);
        }
        assert_eq!(status.escalation_level, ESCALATION_PERIODS.len() - 1);
        assert_eq!(status.disabled_until, Some(now + chrono::Duration::hours(24)));
        assert_eq!(status.initial_failure, Some(now));
    }

    #[test]
    fn test_retry_after_sets_minimum_backoff() {
        let now = Utc::now();
        let mut status = IndexerStatus::new("x");
        status.record_failure(now, Some(Duration::from_secs(60 * 60)));
        assert_eq!(status.disabled_until, Some(now + chrono::Duration::hours(1)));
        assert!(status.is_disabled(now));
        assert!(!status.is_disabled(now + chrono::Duration::hours(2)));
    }

    #[test]
    fn test_load_skips_disabled_and_reports_failures() {
        let manager = manager();
        let mut broken = definition("broken", "Broken", true);
        broken.implementation = "gazelle".to_string();

        let failures = manager.load(vec![
            definition("b", "Bravo", true),
            definition("a", "Alpha", true),
            definition("off", "Off", false),
            broken,
        ]);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        let names: Vec<String> = manager.list().iter().map(|i| i.name().to_string()).collect();
        assert_eq!(names, vec!["Alpha", "Bravo"]);
    }

    #[test]
    fn test_failures_back_off_and_success_resets() {
        let manager = manager();
        manager.record(
            "a",
            Some(Failure::of(&IndexerError::rate_limited(Duration::from_secs(120), "slow"))),
        );
        let status = manager.status("a").unwrap();
        assert!(status.is_disabled(Utc::now()));
        assert_eq!(status.escalation_level, 1);

        manager.record("a", Some(Failure::Cancelled));
        assert_eq!(manager.status("a").unwrap().escalation_level, 1);

        manager.record("a", None);
        assert!(manager.status("a").is_none());
    }

    #[tokio::test]
    async fn test_disabled_indexers_are_skipped() {
        let manager = manager();
        manager.load(vec![definition("a", "Alpha", true)]);
        manager.record("a", Some(Failure::Failed { retry_after: None }));

        let results = manager
            .search(&SearchCriteria::search("x"), None, &CancellationToken::new())
            .await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_remove_forgets_indexer() {
        let manager = manager();
        manager.load(vec![definition("a", "Alpha", true)]);
        assert!(manager.remove("a"));
        assert!(manager.get("a").is_none());
        assert!(!manager.remove("a"));
    }
}
