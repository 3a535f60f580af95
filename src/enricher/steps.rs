//! Enrichment steps
//!
//! Each source is one independent step that returns a partial update plus an
//! optional error. Steps run in order and a failed step simply contributes an
//! empty patch, leaving the documented defaults in place.

use super::BatchSnapshot;
use crate::aggregator::{EventRateAggregator, SampledHours};
use crate::error::TrendError;
use crate::model::{FeatureRecord, UNKNOWN_LANGUAGE};
use crate::sources::{BuzzSource, MetadataSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Partial update produced by one step. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeaturePatch {
    pub stars_total: Option<u64>,
    pub forks_total: Option<u64>,
    pub language: Option<String>,
    pub created_at: Option<String>,
    pub star_velocity: Option<u64>,
    pub commit_frequency: Option<u64>,
    pub buzz_score: Option<f64>,
}

#[derive(Debug)]
pub struct StepOutcome {
    pub patch: FeaturePatch,
    pub error: Option<TrendError>,
}

impl StepOutcome {
    pub fn patch(patch: FeaturePatch) -> Self {
        Self { patch, error: None }
    }

    pub fn unchanged() -> Self {
        Self::patch(FeaturePatch::default())
    }

    pub fn failed(error: TrendError) -> Self {
        Self {
            patch: FeaturePatch::default(),
            error: Some(error),
        }
    }
}

/// Record under construction plus merge-only inputs such as the creation time.
#[derive(Debug, Clone)]
pub struct MergeDraft {
    pub record: FeatureRecord,
    pub created_at: Option<String>,
}

impl MergeDraft {
    pub fn new(record: FeatureRecord) -> Self {
        Self {
            record,
            created_at: None,
        }
    }

    pub fn apply(&mut self, patch: FeaturePatch) {
        let record = &mut self.record;
        if let Some(v) = patch.stars_total {
            record.stars_total = v;
        }
        if let Some(v) = patch.forks_total {
            record.forks_total = v;
        }
        if let Some(v) = patch.language {
            record.language = v;
        }
        if let Some(v) = patch.star_velocity {
            record.star_velocity = v;
        }
        if let Some(v) = patch.commit_frequency {
            record.commit_frequency = v;
        }
        if let Some(v) = patch.buzz_score {
            record.buzz_score = v;
        }
        if patch.created_at.is_some() {
            self.created_at = patch.created_at;
        }
    }

    /// Derived fields are computed last, purely from the merged values.
    pub fn finish(mut self, as_of: DateTime<Utc>) -> FeatureRecord {
        self.record.days_old = compute_days_old(self.created_at.as_deref(), as_of);
        self.record.recompute_derived();
        self.record
    }
}

/// Age in whole days; 0 when the timestamp is missing, unparseable or in the future.
pub fn compute_days_old(created_at: Option<&str>, as_of: DateTime<Utc>) -> u64 {
    let Some(raw) = created_at else {
        return 0;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(created) => {
            let days = (as_of - created.with_timezone(&Utc)).num_days();
            days.max(0) as u64
        }
        Err(e) => {
            warn!(created_at = raw, error = %e, "Invalid created_at timestamp, using days_old = 0");
            0
        }
    }
}

#[async_trait]
pub trait EnrichmentStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// `snapshot` is present in batch mode; without it a step may fetch on its own.
    async fn run(
        &self,
        repo_name: &str,
        as_of: DateTime<Utc>,
        snapshot: Option<&BatchSnapshot>,
    ) -> StepOutcome;
}

pub struct MetadataStep {
    source: Arc<dyn MetadataSource>,
}

impl MetadataStep {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl EnrichmentStep for MetadataStep {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn run(
        &self,
        repo_name: &str,
        _as_of: DateTime<Utc>,
        _snapshot: Option<&BatchSnapshot>,
    ) -> StepOutcome {
        match self.source.get(repo_name).await {
            Ok(meta) => StepOutcome::patch(FeaturePatch {
                stars_total: Some(meta.stars_total),
                forks_total: Some(meta.forks_total),
                language: Some(
                    meta.language
                        .filter(|l| !l.trim().is_empty())
                        .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string()),
                ),
                created_at: meta.created_at,
                ..FeaturePatch::default()
            }),
            Err(e) => StepOutcome::failed(e),
        }
    }
}

pub struct RateStep {
    aggregator: EventRateAggregator,
    hours: SampledHours,
}

impl RateStep {
    pub fn new(aggregator: EventRateAggregator, hours: SampledHours) -> Self {
        Self { aggregator, hours }
    }
}

#[async_trait]
impl EnrichmentStep for RateStep {
    fn name(&self) -> &'static str {
        "rates"
    }

    async fn run(
        &self,
        repo_name: &str,
        as_of: DateTime<Utc>,
        snapshot: Option<&BatchSnapshot>,
    ) -> StepOutcome {
        let rate = match snapshot {
            Some(snapshot) => snapshot.rates.rate(repo_name),
            None => {
                debug!(repo = repo_name, "No batch rate table, fetching archive hours for one repository");
                self.aggregator
                    .rates_for_date(as_of, &self.hours)
                    .await
                    .rate(repo_name)
            }
        };

        match rate {
            Some(rate) => StepOutcome::patch(FeaturePatch {
                star_velocity: Some(rate.star_velocity),
                commit_frequency: Some(rate.commit_frequency),
                ..FeaturePatch::default()
            }),
            None => StepOutcome::unchanged(),
        }
    }
}

pub struct BuzzStep {
    source: Arc<dyn BuzzSource>,
}

impl BuzzStep {
    pub fn new(source: Arc<dyn BuzzSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl EnrichmentStep for BuzzStep {
    fn name(&self) -> &'static str {
        "buzz"
    }

    async fn run(
        &self,
        repo_name: &str,
        _as_of: DateTime<Utc>,
        snapshot: Option<&BatchSnapshot>,
    ) -> StepOutcome {
        let score = match snapshot {
            Some(snapshot) => snapshot.buzz.get(repo_name).copied(),
            None => match self.source.get_mentions().await {
                Ok(table) => table.get(repo_name).copied(),
                Err(e) => return StepOutcome::failed(e),
            },
        };

        match score {
            Some(score) => StepOutcome::patch(FeaturePatch {
                buzz_score: Some(score.max(0.0)),
                ..FeaturePatch::default()
            }),
            None => StepOutcome::unchanged(),
        }
    }
}
