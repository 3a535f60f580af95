//! SQLite-backed feature sink with true upsert-by-key.

use super::{validate_batch, FeatureSink, SinkStatistics, TOP_LANGUAGES};
use crate::error::{Result, TrendError};
use crate::model::{FeatureRecord, LabelDistribution, TrendLabel};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SELECT_COLUMNS: &str = "repo_name, collection_date, stars_total, forks_total, star_velocity, \
     commit_frequency, language, days_old, fork_rate, popularity_score, stars_per_day, buzz_score, \
     is_trending";

pub struct SqliteSink {
    path: Option<PathBuf>,
    db: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(&path)
            .map_err(|e| TrendError::Sink(format!("Failed to open {}: {}", path.display(), e)))?;
        let sink = Self {
            path: Some(path),
            db: Mutex::new(db),
        };
        sink.init_schema()?;
        info!(path = ?sink.path, "Opened SQLite feature sink");
        Ok(sink)
    }

    pub fn open_in_memory() -> Result<Self> {
        let sink = Self {
            path: None,
            db: Mutex::new(Connection::open_in_memory()?),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TrendError::Sink("connection mutex poisoned".into()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS feature_records (
                repo_name TEXT NOT NULL,
                collection_date TEXT NOT NULL,
                stars_total INTEGER NOT NULL,
                forks_total INTEGER NOT NULL,
                star_velocity INTEGER NOT NULL,
                commit_frequency INTEGER NOT NULL,
                language TEXT NOT NULL,
                days_old INTEGER NOT NULL,
                fork_rate REAL NOT NULL,
                popularity_score REAL NOT NULL,
                stars_per_day REAL NOT NULL,
                buzz_score REAL NOT NULL,
                is_trending INTEGER NOT NULL,
                PRIMARY KEY (repo_name, collection_date)
            )
            "#,
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_feature_records_date ON feature_records(collection_date)",
            [],
        )?;
        Ok(())
    }
}

fn to_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_int(value: i64) -> u64 {
    value.max(0) as u64
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FeatureRecord> {
    let collection_date: String = row.get(1)?;
    let label: i64 = row.get(12)?;
    let is_trending = i8::try_from(label)
        .ok()
        .and_then(|v| TrendLabel::try_from(v).ok())
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(12, label))?;

    Ok(FeatureRecord {
        repo_name: row.get(0)?,
        collection_date: parse_date(&collection_date)?,
        stars_total: from_int(row.get(2)?),
        forks_total: from_int(row.get(3)?),
        star_velocity: from_int(row.get(4)?),
        commit_frequency: from_int(row.get(5)?),
        language: row.get(6)?,
        days_old: from_int(row.get(7)?),
        fork_rate: row.get(8)?,
        popularity_score: row.get(9)?,
        stars_per_day: row.get(10)?,
        buzz_score: row.get(11)?,
        is_trending,
    })
}

impl FeatureSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn upsert(&self, records: &[FeatureRecord]) -> Result<usize> {
        validate_batch(records)?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut db = self.lock()?;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO feature_records
                (repo_name, collection_date, stars_total, forks_total, star_velocity, commit_frequency,
                 language, days_old, fork_rate, popularity_score, stars_per_day, buzz_score, is_trending)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(repo_name, collection_date) DO UPDATE SET
                    stars_total = excluded.stars_total,
                    forks_total = excluded.forks_total,
                    star_velocity = excluded.star_velocity,
                    commit_frequency = excluded.commit_frequency,
                    language = excluded.language,
                    days_old = excluded.days_old,
                    fork_rate = excluded.fork_rate,
                    popularity_score = excluded.popularity_score,
                    stars_per_day = excluded.stars_per_day,
                    buzz_score = excluded.buzz_score,
                    is_trending = excluded.is_trending
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    record.repo_name,
                    record.collection_date.format(DATE_FORMAT).to_string(),
                    to_int(record.stars_total),
                    to_int(record.forks_total),
                    to_int(record.star_velocity),
                    to_int(record.commit_frequency),
                    record.language,
                    to_int(record.days_old),
                    record.fork_rate,
                    record.popularity_score,
                    record.stars_per_day,
                    record.buzz_score,
                    record.is_trending.as_i8(),
                ])?;
            }
        }
        // Dropping an uncommitted transaction rolls it back
        tx.commit()?;

        debug!(records = records.len(), "Upserted feature records");
        Ok(records.len())
    }

    fn read_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Vec<FeatureRecord>> {
        let db = self.lock()?;
        let start = start.map(|d| d.format(DATE_FORMAT).to_string());
        let end = end.map(|d| d.format(DATE_FORMAT).to_string());

        let sql = format!(
            "SELECT {} FROM feature_records \
             WHERE (?1 IS NULL OR collection_date >= ?1) AND (?2 IS NULL OR collection_date <= ?2) \
             ORDER BY collection_date, repo_name",
            SELECT_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![start, end], record_from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn statistics(&self) -> Result<SinkStatistics> {
        let db = self.lock()?;

        let (total_rows, unique_repos, first, last): (i64, i64, Option<String>, Option<String>) = db
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT repo_name), MIN(collection_date), MAX(collection_date) \
                 FROM feature_records",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
        let date_span = match (first, last) {
            (Some(first), Some(last)) => Some((parse_date(&first)?, parse_date(&last)?)),
            _ => None,
        };

        let mut labels = LabelDistribution::default();
        let mut stmt = db.prepare("SELECT is_trending, COUNT(*) FROM feature_records GROUP BY is_trending")?;
        let label_rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        for row in label_rows {
            let (label, count) = row?;
            let count = from_int(count) as usize;
            match label {
                1 => labels.trending += count,
                0 => labels.not_trending += count,
                _ => labels.pending += count,
            }
        }

        let mut stmt = db.prepare(
            "SELECT language, COUNT(*) AS n FROM feature_records \
             GROUP BY language ORDER BY n DESC, language ASC LIMIT ?1",
        )?;
        let top_languages = stmt
            .query_map(params![TOP_LANGUAGES as i64], |row| {
                Ok((row.get::<_, String>(0)?, from_int(row.get(1)?) as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(SinkStatistics {
            total_rows: from_int(total_rows) as usize,
            unique_repos: from_int(unique_repos) as usize,
            date_span,
            labels,
            top_languages,
        })
    }
}
