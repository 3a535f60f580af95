//! Trending History Store
//!
//! Date -> ordered list of repositories seen trending that day, persisted as a
//! single JSON document. Recording a date replaces that date's list.
//!
//! A missing or corrupt file loads as an empty history.

use crate::error::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const HISTORY_FILE: &str = "trending_history.json";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default)]
pub struct TrendingHistory {
    path: Option<PathBuf>,
    // ISO date keys sort chronologically
    entries: BTreeMap<String, Vec<String>>,
}

impl TrendingHistory {
    /// History that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Trending history unreadable, starting empty");
                BTreeMap::new()
            }
        };
        info!(path = %path.display(), dates = entries.len(), "Loaded trending history");
        Self {
            path: Some(path),
            entries,
        }
    }

    pub fn open_in(data_dir: impl AsRef<Path>) -> Self {
        Self::open(data_dir.as_ref().join(HISTORY_FILE))
    }

    fn load_entries(path: &Path) -> Result<BTreeMap<String, Vec<String>>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replaces the list stored for `date` and rewrites the file.
    ///
    /// A failed write is logged; memory keeps the new list and the file catches
    /// up on the next successful write.
    pub fn record(&mut self, date: NaiveDate, repo_names: &[String]) {
        let key = date.format(DATE_FORMAT).to_string();
        if let Some(previous) = self.entries.insert(key.clone(), repo_names.to_vec()) {
            debug!(date = %key, previous = previous.len(), "Overwriting trending history entry");
        }
        info!(date = %key, repos = repo_names.len(), "Recorded trending snapshot");

        if let Err(e) = self.persist() {
            error!(date = %key, error = %e, "Failed to persist trending history");
        }
    }

    /// Writes the whole store via a temp file so readers never see a partial document.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get(&self, date: NaiveDate) -> Option<&[String]> {
        self.entries
            .get(&date.format(DATE_FORMAT).to_string())
            .map(Vec::as_slice)
    }

    /// Parsed entries; malformed keys are skipped with a warning.
    fn dated_entries(&self) -> impl Iterator<Item = (NaiveDate, &Vec<String>)> + '_ {
        self.entries.iter().filter_map(|(key, repos)| {
            match NaiveDate::parse_from_str(key, DATE_FORMAT) {
                Ok(date) => Some((date, repos)),
                Err(_) => {
                    warn!(key = %key, "Skipping malformed history date");
                    None
                }
            }
        })
    }

    /// Union of every list dated within `[start, end]`, both ends inclusive.
    pub fn members_in_range(&self, start: NaiveDate, end: NaiveDate) -> HashSet<String> {
        if start > end {
            return HashSet::new();
        }
        self.dated_entries()
            .filter(|(date, _)| *date >= start && *date <= end)
            .flat_map(|(_, repos)| repos.iter().cloned())
            .collect()
    }

    pub fn contains_in_range(&self, repo_name: &str, start: NaiveDate, end: NaiveDate) -> bool {
        start <= end
            && self
                .dated_entries()
                .any(|(date, repos)| date >= start && date <= end && repos.iter().any(|r| r == repo_name))
    }

    /// Earliest and latest recorded dates.
    pub fn known_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut dates = self.dated_entries().map(|(date, _)| date);
        let first = dates.next()?;
        let last = dates.last().unwrap_or(first);
        Some((first, last))
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.known_span().map(|(_, latest)| latest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
