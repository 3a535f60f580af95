//! Feature sink
//!
//! Stand-in for the downstream feature store. Records are keyed by
//! `(repo_name, collection_date)`; upserting an existing key overwrites it.
//! Every `upsert` call is all-or-nothing.

pub mod memory;
pub mod sqlite;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;

use crate::error::{Result, TrendError};
use crate::model::{is_valid_repo_name, FeatureRecord, LabelDistribution};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

pub const TOP_LANGUAGES: usize = 10;

pub trait FeatureSink: Send + Sync {
    fn name(&self) -> &str;

    /// Inserts or overwrites every record; returns the number written.
    fn upsert(&self, records: &[FeatureRecord]) -> Result<usize>;

    /// Records whose collection date falls within the inclusive bounds.
    fn read_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Vec<FeatureRecord>>;

    fn statistics(&self) -> Result<SinkStatistics> {
        Ok(SinkStatistics::from_records(&self.read_range(None, None)?))
    }
}

/// Rejects rows that must never reach the sink.
pub fn validate_batch(records: &[FeatureRecord]) -> Result<()> {
    for record in records {
        if !is_valid_repo_name(&record.repo_name) {
            return Err(TrendError::Schema(format!(
                "invalid repo_name {:?} on {}",
                record.repo_name, record.collection_date
            )));
        }
        let floats = [
            ("fork_rate", record.fork_rate),
            ("popularity_score", record.popularity_score),
            ("stars_per_day", record.stars_per_day),
            ("buzz_score", record.buzz_score),
        ];
        if let Some((column, value)) = floats.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(TrendError::Schema(format!(
                "{} = {} for {} on {}",
                column, value, record.repo_name, record.collection_date
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SinkStatistics {
    pub total_rows: usize,
    pub unique_repos: usize,
    pub date_span: Option<(NaiveDate, NaiveDate)>,
    pub labels: LabelDistribution,
    /// Most common languages, descending by count.
    pub top_languages: Vec<(String, usize)>,
}

impl SinkStatistics {
    pub fn from_records(records: &[FeatureRecord]) -> Self {
        let unique_repos = records.iter().map(|r| r.repo_name.as_str()).unique().count();
        let date_span = records
            .iter()
            .map(|r| r.collection_date)
            .minmax()
            .into_option();

        let mut languages: HashMap<&str, usize> = HashMap::new();
        for record in records {
            *languages.entry(record.language.as_str()).or_insert(0) += 1;
        }
        let top_languages = languages
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
            .take(TOP_LANGUAGES)
            .map(|(language, count)| (language.to_string(), count))
            .collect();

        Self {
            total_rows: records.len(),
            unique_repos,
            date_span,
            labels: LabelDistribution::from_records(records),
            top_languages,
        }
    }
}

impl fmt::Display for SinkStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total rows: {}", self.total_rows)?;
        writeln!(f, "Unique repositories: {}", self.unique_repos)?;
        match self.date_span {
            Some((first, last)) => writeln!(f, "Date range: {} to {}", first, last)?,
            None => writeln!(f, "Date range: (empty)")?,
        }
        writeln!(f, "Labels: {}", self.labels)?;
        write!(f, "Top languages:")?;
        for (language, count) in &self.top_languages {
            write!(f, "\n  {}: {}", language, count)?;
        }
        Ok(())
    }
}

pub(crate) fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
}
