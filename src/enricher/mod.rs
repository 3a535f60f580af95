//! Multi-Source Feature Merger
//!
//! Builds one `FeatureRecord` per repository from three independent sources:
//! metadata, archive rates and buzz. Each source is an `EnrichmentStep`; a
//! failing step leaves its fields at their defaults and never fails the record.
//!
//! In batch mode the rate table and the buzz table are fetched once and handed
//! to every worker as an immutable `BatchSnapshot`. The snapshot lives only for
//! the duration of the batch call.

pub mod steps;

pub use steps::{
    compute_days_old, BuzzStep, EnrichmentStep, FeaturePatch, MergeDraft, MetadataStep, RateStep,
    StepOutcome,
};

use crate::aggregator::{EventRateAggregator, RateTable, SampledHours};
use crate::error::{Result, TrendError};
use crate::model::{is_valid_repo_name, BuzzTable, FeatureRecord};
use crate::sources::{BuzzSource, EventArchive, MetadataSource, Sources};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Which batch-level sources to fetch. A disabled source yields an empty table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceToggles {
    pub rates: bool,
    pub buzz: bool,
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            rates: true,
            buzz: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub task_timeout: Duration,
    pub toggles: SourceToggles,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            task_timeout: Duration::from_secs(60),
            toggles: SourceToggles::default(),
        }
    }
}

/// Read-only tables shared by every worker of one batch.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub rates: Arc<RateTable>,
    pub buzz: Arc<BuzzTable>,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful records, in completion order.
    pub records: Vec<FeatureRecord>,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn attempted(&self) -> usize {
        self.records.len() + self.failed
    }
}

#[derive(Clone)]
pub struct FeatureMerger {
    steps: Arc<Vec<Box<dyn EnrichmentStep>>>,
    aggregator: EventRateAggregator,
    buzz: Arc<dyn BuzzSource>,
    hours: SampledHours,
}

impl FeatureMerger {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        archive: Arc<dyn EventArchive>,
        buzz: Arc<dyn BuzzSource>,
        hours: SampledHours,
    ) -> Self {
        let aggregator = EventRateAggregator::new(archive);
        let steps: Vec<Box<dyn EnrichmentStep>> = vec![
            Box::new(MetadataStep::new(metadata)),
            Box::new(RateStep::new(aggregator.clone(), hours.clone())),
            Box::new(BuzzStep::new(Arc::clone(&buzz))),
        ];
        Self {
            steps: Arc::new(steps),
            aggregator,
            buzz,
            hours,
        }
    }

    pub fn from_sources(sources: &Sources, hours: SampledHours) -> Self {
        Self::new(
            Arc::clone(&sources.metadata),
            Arc::clone(&sources.archive),
            Arc::clone(&sources.buzz),
            hours,
        )
    }

    pub fn sampled_hours(&self) -> &SampledHours {
        &self.hours
    }

    pub fn aggregator(&self) -> &EventRateAggregator {
        &self.aggregator
    }

    /// Single-repository enrichment. Without a batch snapshot the rate and
    /// buzz steps fetch their sources directly.
    pub async fn enrich_one(&self, repo_name: &str, as_of: DateTime<Utc>) -> Result<FeatureRecord> {
        self.merge(repo_name, as_of, None).await
    }

    async fn merge(
        &self,
        repo_name: &str,
        as_of: DateTime<Utc>,
        snapshot: Option<&BatchSnapshot>,
    ) -> Result<FeatureRecord> {
        if !is_valid_repo_name(repo_name) {
            return Err(TrendError::InvalidRepo(repo_name.to_string()));
        }

        let mut draft = MergeDraft::new(FeatureRecord::unlabeled(repo_name, as_of.date_naive()));
        for step in self.steps.iter() {
            let outcome = step.run(repo_name, as_of, snapshot).await;
            if let Some(e) = &outcome.error {
                warn!(repo = repo_name, step = step.name(), error = %e, "Enrichment step failed, keeping defaults");
            }
            draft.apply(outcome.patch);
        }

        let record = draft.finish(as_of);
        debug!(
            repo = repo_name,
            stars = record.stars_total,
            star_velocity = record.star_velocity,
            "Merged features"
        );
        Ok(record)
    }

    async fn fetch_buzz(&self, enabled: bool) -> BuzzTable {
        if !enabled {
            debug!("Buzz source disabled for this batch");
            return BuzzTable::new();
        }
        match self.buzz.get_mentions().await {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "Buzz source unavailable, using 0.0 for the batch");
                BuzzTable::new()
            }
        }
    }

    /// Fetches the batch-level sources exactly once.
    pub async fn prefetch(&self, as_of: DateTime<Utc>, toggles: SourceToggles) -> BatchSnapshot {
        let rates = if toggles.rates {
            self.aggregator.rates_for_date(as_of, &self.hours).await
        } else {
            debug!("Rate source disabled for this batch");
            RateTable::empty(self.hours.clone())
        };
        let buzz = self.fetch_buzz(toggles.buzz).await;
        BatchSnapshot {
            rates: Arc::new(rates),
            buzz: Arc::new(buzz),
        }
    }

    pub async fn enrich_batch(
        &self,
        repo_names: &[String],
        as_of: DateTime<Utc>,
        options: &BatchOptions,
    ) -> BatchOutcome {
        let snapshot = self.prefetch(as_of, options.toggles).await;
        self.run_batch(repo_names, as_of, options, snapshot).await
    }

    /// Batch enrichment reusing a rate table the caller already built for `as_of`.
    pub async fn enrich_batch_with_rates(
        &self,
        repo_names: &[String],
        as_of: DateTime<Utc>,
        options: &BatchOptions,
        rates: RateTable,
    ) -> BatchOutcome {
        let snapshot = BatchSnapshot {
            rates: Arc::new(rates),
            buzz: Arc::new(self.fetch_buzz(options.toggles.buzz).await),
        };
        self.run_batch(repo_names, as_of, options, snapshot).await
    }

    async fn run_batch(
        &self,
        repo_names: &[String],
        as_of: DateTime<Utc>,
        options: &BatchOptions,
        snapshot: BatchSnapshot,
    ) -> BatchOutcome {
        if repo_names.is_empty() {
            return BatchOutcome::default();
        }

        let concurrency = options.concurrency.clamp(1, repo_names.len());
        let task_timeout = options.task_timeout;
        info!(
            repos = repo_names.len(),
            workers = concurrency,
            timeout_secs = task_timeout.as_secs(),
            "Enriching batch"
        );

        let snapshot = Arc::new(snapshot);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set: JoinSet<(String, Result<FeatureRecord>)> = JoinSet::new();

        for repo_name in repo_names {
            let repo_name = repo_name.clone();
            let merger = self.clone();
            let snapshot = Arc::clone(&snapshot);
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            repo_name,
                            Err(TrendError::Aborted("worker pool closed".into())),
                        );
                    }
                };

                let merged = tokio::time::timeout(
                    task_timeout,
                    merger.merge(&repo_name, as_of, Some(snapshot.as_ref())),
                )
                .await;
                let result = match merged {
                    Ok(result) => result,
                    Err(_) => Err(TrendError::Timeout(task_timeout.as_secs())),
                };
                (repo_name, result)
            });
        }

        let mut outcome = BatchOutcome::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(record))) => outcome.records.push(record),
                Ok((repo_name, Err(e))) => {
                    outcome.failed += 1;
                    error!(repo = %repo_name, error = %e, "Enrichment failed");
                }
                Err(join_error) => {
                    outcome.failed += 1;
                    error!(error = %join_error, "Enrichment task panicked or was cancelled");
                }
            }
        }

        info!(
            enriched = outcome.records.len(),
            failed = outcome.failed,
            "Batch enrichment finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArchiveEvent, EventKind, RepoMetadata, TrendLabel, UNKNOWN_LANGUAGE};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeMetadata {
        repos: HashMap<String, RepoMetadata>,
        delay: Option<(String, Duration)>,
    }

    #[async_trait]
    impl MetadataSource for FakeMetadata {
        async fn get(&self, repo_name: &str) -> Result<RepoMetadata> {
            if let Some((slow, delay)) = &self.delay {
                if slow == repo_name {
                    tokio::time::sleep(*delay).await;
                }
            }
            self.repos
                .get(repo_name)
                .cloned()
                .ok_or_else(|| TrendError::unavailable("metadata", "403 forbidden"))
        }
    }

    #[derive(Default)]
    struct CountingArchive {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventArchive for CountingArchive {
        async fn fetch_hour(&self, _date: NaiveDate, hour: u32) -> Result<Vec<ArchiveEvent>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut events = vec![ArchiveEvent::new(EventKind::Star, "acme/rocket")];
            if hour == 12 {
                events.push(ArchiveEvent::new(EventKind::Push, "acme/rocket"));
                events.push(ArchiveEvent::new(EventKind::Star, "acme/rocket"));
            }
            Ok(events)
        }
    }

    #[derive(Default)]
    struct CountingBuzz {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BuzzSource for CountingBuzz {
        async fn get_mentions(&self) -> Result<BuzzTable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(BuzzTable::from([("acme/rocket".to_string(), 42.0)]))
        }
    }

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 1, 23, 59, 59).unwrap()
    }

    fn metadata() -> HashMap<String, RepoMetadata> {
        HashMap::from([(
            "acme/widget".to_string(),
            RepoMetadata {
                stars_total: 200,
                forks_total: 50,
                language: Some("Rust".into()),
                created_at: Some("2024-11-21T23:59:59Z".into()),
            },
        )])
    }

    fn merger(
        delay: Option<(String, Duration)>,
    ) -> (FeatureMerger, Arc<CountingArchive>, Arc<CountingBuzz>) {
        let archive = Arc::new(CountingArchive::default());
        let buzz = Arc::new(CountingBuzz::default());
        let merger = FeatureMerger::new(
            Arc::new(FakeMetadata {
                repos: metadata(),
                delay,
            }),
            archive.clone(),
            buzz.clone(),
            SampledHours::default(),
        );
        (merger, archive, buzz)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_record_with_defaults() {
        let (merger, _, _) = merger(None);
        let outcome = merger
            .enrich_batch(&names(&["acme/rocket", "acme/widget"]), as_of(), &BatchOptions::default())
            .await;

        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.records.len(), 2);

        let rocket = outcome
            .records
            .iter()
            .find(|r| r.repo_name == "acme/rocket")
            .unwrap();
        assert_eq!(rocket.stars_total, 0);
        assert_eq!(rocket.forks_total, 0);
        assert_eq!(rocket.language, UNKNOWN_LANGUAGE);
        // 3 stars over [12, 23], factor 12
        assert_eq!(rocket.star_velocity, 36);
        assert_eq!(rocket.commit_frequency, 12);
        assert_eq!(rocket.buzz_score, 42.0);
        assert_eq!(rocket.is_trending, TrendLabel::Pending);

        let widget = outcome
            .records
            .iter()
            .find(|r| r.repo_name == "acme/widget")
            .unwrap();
        assert_eq!(widget.stars_total, 200);
        assert_eq!(widget.language, "Rust");
        assert_eq!(widget.days_old, 10);
        assert_eq!(widget.star_velocity, 0);
        assert_eq!(widget.buzz_score, 0.0);
        assert!((widget.stars_per_day - 20.0).abs() < 1e-9);
        assert_eq!(widget.collection_date, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
    }

    #[tokio::test]
    async fn test_batch_fetches_shared_sources_once() {
        let (merger, archive, buzz) = merger(None);
        let repos = names(&["a/one", "a/two", "a/three", "a/four", "a/five", "a/six"]);
        let outcome = merger.enrich_batch(&repos, as_of(), &BatchOptions::default()).await;

        assert_eq!(outcome.records.len(), 6);
        assert_eq!(archive.calls.load(Ordering::SeqCst), 2);
        assert_eq!(buzz.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_toggled_off_sources_are_not_fetched() {
        let (merger, archive, buzz) = merger(None);
        let options = BatchOptions {
            toggles: SourceToggles {
                rates: false,
                buzz: false,
            },
            ..BatchOptions::default()
        };
        let outcome = merger.enrich_batch(&names(&["acme/rocket"]), as_of(), &options).await;

        assert_eq!(archive.calls.load(Ordering::SeqCst), 0);
        assert_eq!(buzz.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.records[0].star_velocity, 0);
        assert_eq!(outcome.records[0].buzz_score, 0.0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure_for_that_repo_only() {
        let (merger, _, _) = merger(Some(("acme/widget".into(), Duration::from_secs(5))));
        let options = BatchOptions {
            task_timeout: Duration::from_millis(50),
            ..BatchOptions::default()
        };
        let outcome = merger
            .enrich_batch(&names(&["acme/widget", "acme/rocket"]), as_of(), &options)
            .await;

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].repo_name, "acme/rocket");
        assert_eq!(outcome.attempted(), 2);
    }

    #[tokio::test]
    async fn test_invalid_repo_name_is_a_failure_not_a_panic() {
        let (merger, _, _) = merger(None);
        let outcome = merger
            .enrich_batch(&names(&["not-a-repo", "acme/rocket"]), as_of(), &BatchOptions::default())
            .await;
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_enrich_one_falls_back_to_direct_fetch() {
        let (merger, archive, buzz) = merger(None);
        let record = merger.enrich_one("acme/rocket", as_of()).await.unwrap();

        assert_eq!(record.star_velocity, 36);
        assert_eq!(record.buzz_score, 42.0);
        assert_eq!(archive.calls.load(Ordering::SeqCst), 2);
        assert_eq!(buzz.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preloaded_rates_skip_archive() {
        let (merger, archive, _) = merger(None);
        let rates = RateTable::empty(SampledHours::default());
        let outcome = merger
            .enrich_batch_with_rates(&names(&["acme/rocket"]), as_of(), &BatchOptions::default(), rates)
            .await;

        assert_eq!(archive.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.records[0].star_velocity, 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (merger, archive, _) = merger(None);
        let outcome = merger.enrich_batch(&[], as_of(), &BatchOptions::default()).await;
        assert_eq!(outcome.attempted(), 0);
        // Shared sources are still fetched once before dispatch
        assert_eq!(archive.calls.load(Ordering::SeqCst), 2);
    }
}
