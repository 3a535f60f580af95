#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trendlens::enricher::BatchOptions;
use trendlens::model::{ArchiveEvent, BuzzTable, EventKind, RepoMetadata};
use trendlens::sources::{BuzzSource, EventArchive, MetadataSource, Sources, TrendingSource};
use trendlens::{PipelineOptions, Result, SampledHours, TrendError};

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn at(s: &str, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date(s).and_hms_opt(hour, 0, 0).unwrap())
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Default)]
pub struct FakeTrending {
    repos: Mutex<Option<Vec<String>>>,
}

impl FakeTrending {
    pub fn set(&self, repos: &[&str]) {
        *self.repos.lock().unwrap() = Some(names(repos));
    }

    pub fn fail(&self) {
        *self.repos.lock().unwrap() = None;
    }
}

#[async_trait]
impl TrendingSource for FakeTrending {
    async fn get_current(&self) -> Result<Vec<String>> {
        self.repos
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TrendError::unavailable("trending", "page unavailable"))
    }
}

#[derive(Default)]
pub struct FakeMetadata {
    repos: HashMap<String, RepoMetadata>,
}

impl FakeMetadata {
    pub fn with(mut self, name: &str, stars: u64, forks: u64, language: &str, created_at: &str) -> Self {
        self.repos.insert(
            name.to_string(),
            RepoMetadata {
                stars_total: stars,
                forks_total: forks,
                language: Some(language.to_string()),
                created_at: Some(created_at.to_string()),
            },
        );
        self
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn get(&self, repo_name: &str) -> Result<RepoMetadata> {
        self.repos
            .get(repo_name)
            .cloned()
            .ok_or_else(|| TrendError::unavailable("metadata", format!("404 for {}", repo_name)))
    }
}

/// Unknown hours are empty; hours marked failing return an error.
#[derive(Default)]
pub struct FakeArchive {
    hours: HashMap<(NaiveDate, u32), Vec<ArchiveEvent>>,
    failing: HashSet<(NaiveDate, u32)>,
    pub calls: AtomicUsize,
}

impl FakeArchive {
    pub fn stars(mut self, day: &str, hour: u32, repo: &str, count: usize) -> Self {
        let events = self.hours.entry((date(day), hour)).or_default();
        events.extend((0..count).map(|_| ArchiveEvent::new(EventKind::Star, repo)));
        self
    }

    pub fn pushes(mut self, day: &str, hour: u32, repo: &str, count: usize) -> Self {
        let events = self.hours.entry((date(day), hour)).or_default();
        events.extend((0..count).map(|_| ArchiveEvent::new(EventKind::Push, repo)));
        self
    }

    pub fn failing(mut self, day: &str, hour: u32) -> Self {
        self.failing.insert((date(day), hour));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventArchive for FakeArchive {
    async fn fetch_hour(&self, day: NaiveDate, hour: u32) -> Result<Vec<ArchiveEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&(day, hour)) {
            return Err(TrendError::unavailable("gharchive", "status 404"));
        }
        Ok(self.hours.get(&(day, hour)).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeBuzz {
    table: BuzzTable,
}

impl FakeBuzz {
    pub fn with(mut self, repo: &str, score: f64) -> Self {
        self.table.insert(repo.to_string(), score);
        self
    }
}

#[async_trait]
impl BuzzSource for FakeBuzz {
    async fn get_mentions(&self) -> Result<BuzzTable> {
        Ok(self.table.clone())
    }
}

pub fn sources(
    metadata: FakeMetadata,
    archive: Arc<FakeArchive>,
    buzz: FakeBuzz,
    trending: Arc<FakeTrending>,
) -> Sources {
    Sources {
        metadata: Arc::new(metadata),
        archive,
        buzz: Arc::new(buzz),
        trending,
    }
}

pub fn options(enable_buzz: bool) -> PipelineOptions {
    let mut batch = BatchOptions::default();
    batch.toggles.buzz = enable_buzz;
    batch.task_timeout = Duration::from_secs(5);
    PipelineOptions {
        batch,
        sampled_hours: SampledHours::default(),
        lookback_days: 7,
        day_pause: Duration::ZERO,
    }
}
