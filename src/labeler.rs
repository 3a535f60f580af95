//! Lookback Labeler
//!
//! A record collected on day D is labeled trending when its repository appears
//! in the history anywhere in `[D+1, D+lookback_days]`.
//!
//! Labeling early is allowed and yields zeros for days the history does not
//! cover yet; callers check `can_label` first.

use crate::error::{Result, TrendError};
use crate::history::TrendingHistory;
use crate::model::{FeatureRecord, LabelDistribution, TrendLabel};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;
pub const MAX_LOOKBACK_DAYS: u32 = 365;

/// A zero-day window is empty and would resolve every record to 0.
pub fn check_lookback_days(lookback_days: u32) -> Result<u32> {
    if lookback_days == 0 || lookback_days > MAX_LOOKBACK_DAYS {
        return Err(TrendError::Config(format!(
            "lookback_days must be between 1 and {}, got {}",
            MAX_LOOKBACK_DAYS, lookback_days
        )));
    }
    Ok(lookback_days)
}

fn days_after(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_signed(Duration::days(days as i64))
        .unwrap_or(NaiveDate::MAX)
}

/// Inclusive forward window for a collection date.
pub fn lookback_window(collection_date: NaiveDate, lookback_days: u32) -> (NaiveDate, NaiveDate) {
    (
        days_after(collection_date, 1),
        days_after(collection_date, lookback_days),
    )
}

#[derive(Debug, Clone, Copy)]
pub struct TrendLabeler {
    lookback_days: u32,
}

impl Default for TrendLabeler {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK_DAYS)
    }
}

impl TrendLabeler {
    pub fn new(lookback_days: u32) -> Self {
        Self { lookback_days }
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    /// True once the history reaches `collection_date + lookback_days`.
    pub fn can_label(&self, history: &TrendingHistory, collection_date: NaiveDate) -> bool {
        let Some(required) = collection_date.checked_add_signed(Duration::days(self.lookback_days as i64)) else {
            return false;
        };
        match history.latest_date() {
            Some(latest) => latest >= required,
            None => false,
        }
    }

    pub fn status(&self, history: &TrendingHistory, collection_date: NaiveDate) -> LabelStatus {
        let (window_start, window_end) = lookback_window(collection_date, self.lookback_days);
        LabelStatus {
            date: collection_date,
            window_start,
            window_end,
            latest_known: history.latest_date(),
            can_label: self.can_label(history, collection_date),
        }
    }

    /// Resolves every pending record against the history.
    ///
    /// Records that already carry a 0/1 label are returned unchanged.
    pub fn label(&self, history: &TrendingHistory, records: Vec<FeatureRecord>) -> Vec<FeatureRecord> {
        // One range query per distinct collection date
        let mut windows: HashMap<NaiveDate, HashSet<String>> = HashMap::new();
        let mut kept = 0usize;

        let labeled: Vec<FeatureRecord> = records
            .into_iter()
            .map(|mut record| {
                if record.is_trending.is_resolved() {
                    kept += 1;
                    return record;
                }
                let members = windows.entry(record.collection_date).or_insert_with(|| {
                    let (start, end) = lookback_window(record.collection_date, self.lookback_days);
                    debug!(collection_date = %record.collection_date, start = %start, end = %end, "Lookback window");
                    history.members_in_range(start, end)
                });
                record.is_trending = TrendLabel::from_membership(members.contains(&record.repo_name));
                record
            })
            .collect();

        let distribution = LabelDistribution::from_records(&labeled);
        info!(
            records = labeled.len(),
            already_labeled = kept,
            lookback_days = self.lookback_days,
            distribution = %distribution,
            "Labeled records"
        );
        labeled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelStatus {
    pub date: NaiveDate,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub latest_known: Option<NaiveDate>,
    pub can_label: bool,
}

impl fmt::Display for LabelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let latest = self
            .latest_known
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "{}: window {}..{}, history through {}, {}",
            self.date,
            self.window_start,
            self.window_end,
            latest,
            if self.can_label { "ready to label" } else { "not labelable yet" }
        )
    }
}
