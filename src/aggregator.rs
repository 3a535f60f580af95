//! Event-Rate Aggregator
//!
//! Turns sampled hours of the public event stream into a per-repository rate
//! table. Counts from the sampled hours are summed and extrapolated to a
//! 24-hour equivalent with a factor of `24 / requested hours`.
//!
//! The factor counts requested hours, not hours that returned data: if one of
//! two requested hours fails, the surviving hour is scaled 24x, not 12x.

use crate::error::{Result, TrendError};
use crate::model::EventKind;
use crate::sources::EventArchive;
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Hours of the day to sample, deduplicated and ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampledHours(Vec<u32>);

impl SampledHours {
    pub fn new(hours: impl IntoIterator<Item = u32>) -> Result<Self> {
        let set: BTreeSet<u32> = hours.into_iter().collect();
        if set.is_empty() {
            return Err(TrendError::Config("at least one sampled hour is required".into()));
        }
        if let Some(bad) = set.iter().find(|h| **h > 23) {
            return Err(TrendError::Config(format!("sampled hour {} is outside 0..=23", bad)));
        }
        Ok(Self(set.into_iter().collect()))
    }

    /// Parses a comma-separated list such as `12,23`.
    pub fn parse(list: &str) -> Result<Self> {
        let hours = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| TrendError::Config(format!("invalid sampled hour '{}'", s)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(hours)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extrapolation_factor(&self) -> f64 {
        24.0 / self.0.len() as f64
    }
}

impl Default for SampledHours {
    fn default() -> Self {
        Self(vec![12, 23])
    }
}

impl fmt::Display for SampledHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(","))
    }
}

/// Concrete archive bucket (date, hour-of-day).
pub type HourBucket = (NaiveDate, u32);

/// Most recent occurrence of each sampled hour at or before `target`.
///
/// An hour later in the day than `target` resolves to the previous day.
pub fn sample_buckets(target: DateTime<Utc>, hours: &SampledHours) -> Vec<HourBucket> {
    let current = target.hour() as i64;
    hours
        .as_slice()
        .iter()
        .map(|&hour| {
            let hours_back = (current - hour as i64).rem_euclid(24);
            let at = target - Duration::hours(hours_back);
            (at.date_naive(), at.hour())
        })
        .collect()
}

/// Raw event counts for one repository across the sampled hours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCounts {
    pub stars: u64,
    pub commits: u64,
}

/// 24-hour equivalent rates for one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRate {
    pub star_velocity: u64,
    pub commit_frequency: u64,
}

/// Per-repository sample counts plus what is needed to extrapolate them.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    counts: HashMap<String, SampleCounts>,
    sampled_hours: SampledHours,
    buckets: Vec<HourBucket>,
    failed_buckets: Vec<HourBucket>,
}

impl RateTable {
    pub fn empty(sampled_hours: SampledHours) -> Self {
        Self {
            counts: HashMap::new(),
            sampled_hours,
            buckets: Vec::new(),
            failed_buckets: Vec::new(),
        }
    }

    fn add_event(&mut self, kind: EventKind, repo_name: String) {
        match kind {
            EventKind::Star => self.counts.entry(repo_name).or_default().stars += 1,
            EventKind::Push => self.counts.entry(repo_name).or_default().commits += 1,
            EventKind::Other => {}
        }
    }

    pub fn extrapolation_factor(&self) -> f64 {
        self.sampled_hours.extrapolation_factor()
    }

    pub fn sampled_hours(&self) -> &SampledHours {
        &self.sampled_hours
    }

    pub fn buckets(&self) -> &[HourBucket] {
        &self.buckets
    }

    pub fn failed_buckets(&self) -> &[HourBucket] {
        &self.failed_buckets
    }

    pub fn sample_counts(&self, repo_name: &str) -> Option<SampleCounts> {
        self.counts.get(repo_name).copied()
    }

    /// Extrapolated rate for a repository, truncated to an integer.
    pub fn rate(&self, repo_name: &str) -> Option<RepoRate> {
        let counts = self.counts.get(repo_name)?;
        let factor = self.extrapolation_factor();
        Some(RepoRate {
            star_velocity: extrapolate(counts.stars, factor),
            commit_frequency: extrapolate(counts.commits, factor),
        })
    }

    /// Top `n` repositories by star velocity; ties broken by name.
    pub fn top_by_star_velocity(&self, n: usize) -> Vec<String> {
        self.counts
            .iter()
            .sorted_by(|(a_name, a), (b_name, b)| {
                b.stars.cmp(&a.stars).then_with(|| a_name.cmp(b_name))
            })
            .take(n)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

fn extrapolate(count: u64, factor: f64) -> u64 {
    (count as f64 * factor) as u64
}

#[derive(Clone)]
pub struct EventRateAggregator {
    archive: Arc<dyn EventArchive>,
}

impl EventRateAggregator {
    pub fn new(archive: Arc<dyn EventArchive>) -> Self {
        Self { archive }
    }

    /// Builds the rate table for the day ending at `target`.
    ///
    /// A bucket that cannot be fetched contributes nothing and is logged;
    /// the call itself never fails.
    pub async fn rates_for_date(&self, target: DateTime<Utc>, hours: &SampledHours) -> RateTable {
        let buckets = sample_buckets(target, hours);
        info!(
            anchor = %target,
            hours = %hours,
            buckets = ?buckets,
            factor = hours.extrapolation_factor(),
            "Sampling archive hours"
        );

        let mut table = RateTable::empty(hours.clone());
        let mut dropped = 0usize;

        for &(date, hour) in &buckets {
            table.buckets.push((date, hour));
            match self.archive.fetch_hour(date, hour).await {
                Ok(events) => {
                    for event in events {
                        match event.repo_name {
                            Some(repo_name) => table.add_event(event.kind, repo_name),
                            None => dropped += 1,
                        }
                    }
                }
                Err(e) => {
                    warn!(date = %date, hour, error = %e, "Archive hour unavailable, counting it as empty");
                    table.failed_buckets.push((date, hour));
                }
            }
        }

        info!(
            repos = table.len(),
            failed_hours = table.failed_buckets.len(),
            dropped_without_repo = dropped,
            "Rate table built"
        );
        table
    }
}
