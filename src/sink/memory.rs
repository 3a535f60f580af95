//! In-memory sink for dry runs and tests.

use super::{in_range, validate_batch, FeatureSink};
use crate::error::{Result, TrendError};
use crate::model::FeatureRecord;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Key = (NaiveDate, String);

#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<Key, FeatureRecord>>,
    upserts: Mutex<Vec<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, BTreeMap<Key, FeatureRecord>>> {
        self.rows
            .lock()
            .map_err(|_| TrendError::Sink("memory sink poisoned".into()))
    }

    /// Sizes of every successful upsert call, in order.
    pub fn upsert_sizes(&self) -> Vec<usize> {
        self.upserts.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn get(&self, repo_name: &str, collection_date: NaiveDate) -> Option<FeatureRecord> {
        self.rows()
            .ok()?
            .get(&(collection_date, repo_name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FeatureSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn upsert(&self, records: &[FeatureRecord]) -> Result<usize> {
        validate_batch(records)?;
        let mut rows = self.rows()?;
        for record in records {
            rows.insert(
                (record.collection_date, record.repo_name.clone()),
                record.clone(),
            );
        }
        if let Ok(mut upserts) = self.upserts.lock() {
            upserts.push(records.len());
        }
        Ok(records.len())
    }

    fn read_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Vec<FeatureRecord>> {
        Ok(self
            .rows()?
            .values()
            .filter(|r| in_range(r.collection_date, start, end))
            .cloned()
            .collect())
    }
}
