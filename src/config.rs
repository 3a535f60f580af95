//! Runtime configuration
//!
//! Read from the process environment (after `.env` is loaded by the binary).
//! Every value has a default; malformed values are configuration errors.

use crate::aggregator::SampledHours;
use crate::enricher::{BatchOptions, SourceToggles};
use crate::error::{Result, TrendError};
use crate::history::HISTORY_FILE;
use crate::labeler::{check_lookback_days, DEFAULT_LOOKBACK_DAYS};
use crate::retry::RetryPolicy;
use crate::staging::StagingArea;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const FEATURE_DB_FILE: &str = "features.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Explicit sink location; defaults to `<data_dir>/features.db`
    pub feature_db_path: Option<PathBuf>,
    pub github_token: Option<String>,
    pub sampled_hours: SampledHours,
    pub lookback_days: u32,
    pub workers: usize,
    pub task_timeout: Duration,
    pub http_timeout: Duration,
    /// Whole-request deadline for archive dumps, which run to hundreds of MB
    pub archive_timeout: Duration,
    pub enable_buzz: bool,
    pub enable_archive: bool,
    pub backfill_day_pause: Duration,
    pub trending_retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            feature_db_path: None,
            github_token: None,
            sampled_hours: SampledHours::default(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            workers: 5,
            task_timeout: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            archive_timeout: Duration::from_secs(900),
            enable_buzz: false,
            enable_archive: true,
            backfill_day_pause: Duration::from_secs(2),
            trending_retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let github_token = match get("GITHUB_TOKEN") {
            // Template placeholders from .env.example
            Some(token) if token.starts_with("your_") => None,
            other => other,
        };

        let sampled_hours = match get("GH_ARCHIVE_SPECIFIC_HOURS") {
            Some(list) => SampledHours::parse(&list)?,
            None => defaults.sampled_hours.clone(),
        };

        let trending_retry = RetryPolicy::new(
            parse_or(&get, "TRENDING_MAX_ATTEMPTS", defaults.trending_retry.max_attempts)?,
            Duration::from_millis(parse_or(&get, "TRENDING_BASE_DELAY_MS", 1000u64)?),
        );

        let workers: usize = parse_or(&get, "ENRICH_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(TrendError::Config("ENRICH_WORKERS must be at least 1".into()));
        }

        Ok(Self {
            data_dir: get("TRENDLENS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            feature_db_path: get("FEATURE_DB_PATH").map(PathBuf::from),
            github_token,
            sampled_hours,
            lookback_days: check_lookback_days(parse_or(&get, "LOOKBACK_DAYS", defaults.lookback_days)?)?,
            workers,
            task_timeout: Duration::from_secs(parse_or(&get, "ENRICH_TASK_TIMEOUT_SECS", 60u64)?),
            http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 30u64)?),
            archive_timeout: Duration::from_secs(parse_or(&get, "ARCHIVE_TIMEOUT_SECS", 900u64)?),
            enable_buzz: parse_bool(&get, "ENABLE_HN_BUZZ", defaults.enable_buzz)?,
            enable_archive: parse_bool(&get, "ENABLE_GH_ARCHIVE", defaults.enable_archive)?,
            backfill_day_pause: Duration::from_secs(parse_or(&get, "BACKFILL_DAY_PAUSE_SECS", 2u64)?),
            trending_retry,
        })
    }

    pub fn feature_db_path(&self) -> PathBuf {
        self.feature_db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(FEATURE_DB_FILE))
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn staging(&self) -> StagingArea {
        StagingArea::new(&self.data_dir)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.workers,
            task_timeout: self.task_timeout,
            toggles: SourceToggles {
                rates: self.enable_archive,
                buzz: self.enable_buzz,
            },
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| TrendError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(TrendError::Config(format!("{}={:?} is not a boolean", key, v))),
        },
    }
}
