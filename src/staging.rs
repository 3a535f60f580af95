//! Unlabeled staging copies
//!
//! The daily run keeps each day's unlabeled records as `unlabeled_<date>.csv`
//! until the lookback window has passed and the labeled batch is published.

use crate::error::{Result, TrendError};
use crate::model::{FeatureRecord, FEATURE_COLUMNS};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("unlabeled_{}.csv", date.format("%Y-%m-%d")))
    }

    pub fn exists(&self, date: NaiveDate) -> bool {
        self.path_for(date).exists()
    }

    /// Writes (or replaces) the staging copy for `date`.
    pub fn save(&self, date: NaiveDate, records: &[FeatureRecord]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(date);
        let tmp = path.with_extension("csv.tmp");

        let mut writer = WriterBuilder::new().has_headers(true).from_path(&tmp)?;
        if records.is_empty() {
            writer.write_record(FEATURE_COLUMNS)?;
        }
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        drop(writer);
        std::fs::rename(&tmp, &path)?;

        info!(path = %path.display(), records = records.len(), "Saved unlabeled staging copy");
        Ok(path)
    }

    /// `Ok(None)` when no copy exists for `date`; a copy missing any feature
    /// column is a schema error.
    pub fn load(&self, date: NaiveDate) -> Result<Option<Vec<FeatureRecord>>> {
        let path = self.path_for(date);
        if !path.exists() {
            debug!(path = %path.display(), "No staging copy");
            return Ok(None);
        }

        let mut reader = ReaderBuilder::new().has_headers(true).from_path(&path)?;
        let headers = reader.headers()?.clone();
        let missing: Vec<&str> = FEATURE_COLUMNS
            .iter()
            .copied()
            .filter(|column| !headers.iter().any(|h| h.trim() == *column))
            .collect();
        if !missing.is_empty() {
            return Err(TrendError::Schema(format!(
                "{} is missing columns: {}",
                path.display(),
                missing.join(", ")
            )));
        }

        let records = reader
            .deserialize::<FeatureRecord>()
            .collect::<std::result::Result<Vec<_>, csv::Error>>()?;
        info!(path = %path.display(), records = records.len(), "Loaded staging copy");
        Ok(Some(records))
    }

    /// Returns whether a file was removed.
    pub fn remove(&self, date: NaiveDate) -> Result<bool> {
        let path = self.path_for(date);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Deleted staging copy");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
