//! Orchestration loop
//!
//! Two run variants share one `Pipeline`:
//! - daily: snapshot, enrich, publish unlabeled, stage, then label the copy
//!   staged `lookback_days` ago
//! - backfill: archive-derived snapshots for a historical range, labeled and
//!   published once at the end
//!
//! The pipeline is the only owner of the history store; enrichment workers
//! never touch it.

mod backfill;
mod daily;

use crate::aggregator::SampledHours;
use crate::config::Config;
use crate::enricher::{BatchOptions, FeatureMerger};
use crate::error::{Result, TrendError};
use crate::history::TrendingHistory;
use crate::labeler::{LabelStatus, TrendLabeler};
use crate::model::LabelDistribution;
use crate::sink::FeatureSink;
use crate::sources::Sources;
use crate::staging::StagingArea;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub batch: BatchOptions,
    pub sampled_hours: SampledHours,
    pub lookback_days: u32,
    /// Pause between backfill days
    pub day_pause: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch: BatchOptions::default(),
            sampled_hours: SampledHours::default(),
            lookback_days: crate::labeler::DEFAULT_LOOKBACK_DAYS,
            day_pause: Duration::from_secs(2),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch: config.batch_options(),
            sampled_hours: config.sampled_hours.clone(),
            lookback_days: config.lookback_days,
            day_pause: config.backfill_day_pause,
        }
    }
}

pub struct Pipeline {
    sources: Sources,
    merger: FeatureMerger,
    history: TrendingHistory,
    labeler: TrendLabeler,
    staging: StagingArea,
    sink: Arc<dyn FeatureSink>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        sources: Sources,
        history: TrendingHistory,
        staging: StagingArea,
        sink: Arc<dyn FeatureSink>,
        options: PipelineOptions,
    ) -> Self {
        let merger = FeatureMerger::from_sources(&sources, options.sampled_hours.clone());
        Self {
            sources,
            merger,
            history,
            labeler: TrendLabeler::new(options.lookback_days),
            staging,
            sink,
            options,
        }
    }

    pub fn from_config(config: &Config, sources: Sources, sink: Arc<dyn FeatureSink>) -> Self {
        Self::new(
            sources,
            TrendingHistory::open(config.history_path()),
            config.staging(),
            sink,
            PipelineOptions::from_config(config),
        )
    }

    pub fn history(&self) -> &TrendingHistory {
        &self.history
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn sink(&self) -> &Arc<dyn FeatureSink> {
        &self.sink
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Whether records collected on `date` can be labeled with the history on hand.
    pub fn label_status(&self, date: NaiveDate) -> LabelStatus {
        self.labeler.status(&self.history, date)
    }
}

/// Longest range a single backfill run accepts.
pub const MAX_BACKFILL_DAYS: u32 = 3650;

/// `date` moved back by `days`; leaving the calendar is a configuration error.
pub(crate) fn days_before(date: NaiveDate, days: u32) -> Result<NaiveDate> {
    date.checked_sub_signed(chrono::Duration::days(days as i64))
        .ok_or_else(|| TrendError::Config(format!("{} days before {} is out of range", days, date)))
}

/// Anchor timestamp used for a historical day: the last second of that day.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(time))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunVariant {
    Daily,
    Backfill,
}

impl fmt::Display for RunVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunVariant::Daily => write!(f, "daily"),
            RunVariant::Backfill => write!(f, "backfill"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub variant: RunVariant,
    /// Today for daily runs, last day of the range for backfill
    pub reference_date: NaiveDate,
    pub days_total: usize,
    pub days_processed: usize,
    pub days_failed: usize,
    pub repos_collected: usize,
    pub enrichment_failures: usize,
    pub unlabeled_published: usize,
    pub labeled_published: usize,
    pub labeled_date: Option<NaiveDate>,
    pub labels: LabelDistribution,
}

impl RunSummary {
    pub fn new(variant: RunVariant, reference_date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            variant,
            reference_date,
            days_total: 0,
            days_processed: 0,
            days_failed: 0,
            repos_collected: 0,
            enrichment_failures: 0,
            unlabeled_published: 0,
            labeled_published: 0,
            labeled_date: None,
            labels: LabelDistribution::default(),
        }
    }

    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            variant = %self.variant,
            reference_date = %self.reference_date,
            days_processed = self.days_processed,
            days_failed = self.days_failed,
            repos_collected = self.repos_collected,
            enrichment_failures = self.enrichment_failures,
            unlabeled_published = self.unlabeled_published,
            labeled_published = self.labeled_published,
            labeled_date = ?self.labeled_date,
            labels = %self.labels,
            "Run summary"
        );
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "{} RUN SUMMARY ({})", self.variant.to_string().to_uppercase(), self.run_id)?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Date: {}", self.reference_date)?;
        writeln!(f, "Days processed: {}/{}", self.days_processed, self.days_total)?;
        writeln!(f, "Failed days: {}", self.days_failed)?;
        writeln!(f, "Repos collected: {}", self.repos_collected)?;
        writeln!(f, "Enrichment failures: {}", self.enrichment_failures)?;
        writeln!(f, "Unlabeled published: {}", self.unlabeled_published)?;
        writeln!(f, "Labeled published: {}", self.labeled_published)?;
        if let Some(date) = self.labeled_date {
            writeln!(f, "Labeled date: {}", date)?;
        }
        writeln!(f, "Labels: {}", self.labels)?;
        write!(f, "{}", rule)
    }
}
