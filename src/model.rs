//! Feature records and the collaborator data contracts they are built from.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel used when the metadata source cannot report a language.
pub const UNKNOWN_LANGUAGE: &str = "Unknown";

/// Label of a feature record.
///
/// Persisted as an integer: -1 while the lookback window is still open, 0/1 once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum TrendLabel {
    Pending,
    NotTrending,
    Trending,
}

impl TrendLabel {
    pub fn from_membership(trended: bool) -> Self {
        if trended {
            TrendLabel::Trending
        } else {
            TrendLabel::NotTrending
        }
    }

    pub fn is_resolved(self) -> bool {
        self != TrendLabel::Pending
    }

    pub fn as_i8(self) -> i8 {
        self.into()
    }
}

impl From<TrendLabel> for i8 {
    fn from(label: TrendLabel) -> i8 {
        match label {
            TrendLabel::Pending => -1,
            TrendLabel::NotTrending => 0,
            TrendLabel::Trending => 1,
        }
    }
}

impl TryFrom<i8> for TrendLabel {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            -1 => Ok(TrendLabel::Pending),
            0 => Ok(TrendLabel::NotTrending),
            1 => Ok(TrendLabel::Trending),
            other => Err(format!("is_trending must be -1, 0 or 1, got {}", other)),
        }
    }
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

/// Column names of a feature record, in storage order.
pub const FEATURE_COLUMNS: [&str; 13] = [
    "repo_name",
    "collection_date",
    "stars_total",
    "forks_total",
    "star_velocity",
    "commit_frequency",
    "language",
    "days_old",
    "fork_rate",
    "popularity_score",
    "stars_per_day",
    "buzz_score",
    "is_trending",
];

/// One row per (repo_name, collection_date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub repo_name: String,
    pub collection_date: NaiveDate,
    pub stars_total: u64,
    pub forks_total: u64,
    pub star_velocity: u64,
    pub commit_frequency: u64,
    pub language: String,
    pub days_old: u64,
    pub fork_rate: f64,
    pub popularity_score: f64,
    pub stars_per_day: f64,
    pub buzz_score: f64,
    pub is_trending: TrendLabel,
}

impl FeatureRecord {
    /// A record with every source-backed field at its documented default.
    pub fn unlabeled(repo_name: impl Into<String>, collection_date: NaiveDate) -> Self {
        Self {
            repo_name: repo_name.into(),
            collection_date,
            stars_total: 0,
            forks_total: 0,
            star_velocity: 0,
            commit_frequency: 0,
            language: UNKNOWN_LANGUAGE.to_string(),
            days_old: 0,
            fork_rate: 0.0,
            popularity_score: 0.0,
            stars_per_day: 0.0,
            buzz_score: 0.0,
            is_trending: TrendLabel::Pending,
        }
    }

    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.repo_name, self.collection_date)
    }

    /// Recomputes fork_rate, popularity_score and stars_per_day from the merged values.
    pub fn recompute_derived(&mut self) {
        self.fork_rate = fork_rate(self.stars_total, self.forks_total);
        self.popularity_score =
            popularity_score(self.star_velocity, self.stars_total, self.forks_total);
        self.stars_per_day = stars_per_day(self.stars_total, self.days_old);
    }
}

pub fn fork_rate(stars_total: u64, forks_total: u64) -> f64 {
    forks_total as f64 / stars_total.max(1) as f64
}

pub fn popularity_score(star_velocity: u64, stars_total: u64, forks_total: u64) -> f64 {
    0.5 * star_velocity as f64 + 0.3 * stars_total as f64 + 0.2 * forks_total as f64
}

pub fn stars_per_day(stars_total: u64, days_old: u64) -> f64 {
    stars_total as f64 / days_old.max(1) as f64
}

/// `owner/name`, both halves non-empty, no whitespace.
pub fn is_valid_repo_name(name: &str) -> bool {
    let mut parts = name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) => {
            !owner.is_empty()
                && !repo.is_empty()
                && !name.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

/// Repository snapshot returned by the metadata source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub stars_total: u64,
    pub forks_total: u64,
    pub language: Option<String>,
    /// ISO-8601 creation timestamp
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Star,
    Push,
    Other,
}

impl EventKind {
    /// Maps a GH Archive event type onto the kinds the rate table counts.
    pub fn from_archive_type(event_type: &str) -> Self {
        match event_type {
            "WatchEvent" => EventKind::Star,
            "PushEvent" => EventKind::Push,
            _ => EventKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEvent {
    pub kind: EventKind,
    pub repo_name: Option<String>,
}

impl ArchiveEvent {
    pub fn new(kind: EventKind, repo_name: impl Into<String>) -> Self {
        Self {
            kind,
            repo_name: Some(repo_name.into()),
        }
    }
}

/// repo_name -> buzz score from the mentions feed.
pub type BuzzTable = HashMap<String, f64>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDistribution {
    pub trending: usize,
    pub not_trending: usize,
    pub pending: usize,
}

impl LabelDistribution {
    pub fn from_records(records: &[FeatureRecord]) -> Self {
        records
            .iter()
            .fold(LabelDistribution::default(), |mut dist, record| {
                match record.is_trending {
                    TrendLabel::Trending => dist.trending += 1,
                    TrendLabel::NotTrending => dist.not_trending += 1,
                    TrendLabel::Pending => dist.pending += 1,
                }
                dist
            })
    }

    pub fn total(&self) -> usize {
        self.trending + self.not_trending + self.pending
    }
}

impl fmt::Display for LabelDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trending (1): {}, not trending (0): {}, unlabeled (-1): {}",
            self.trending, self.not_trending, self.pending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_fork_rate_never_divides_by_zero() {
        assert_eq!(fork_rate(0, 0), 0.0);
        assert_eq!(fork_rate(0, 7), 7.0);
        assert_eq!(fork_rate(200, 50), 0.25);
    }

    #[test]
    fn test_stars_per_day_uses_at_least_one_day() {
        assert_eq!(stars_per_day(120, 0), 120.0);
        assert_eq!(stars_per_day(120, 1), 120.0);
        assert_eq!(stars_per_day(120, 4), 30.0);
    }

    #[test]
    fn test_popularity_score_weights() {
        let score = popularity_score(10, 100, 50);
        assert!((score - (5.0 + 30.0 + 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_recompute_derived() {
        let mut record = FeatureRecord::unlabeled("a/b", date("2024-12-01"));
        record.stars_total = 300;
        record.forks_total = 30;
        record.star_velocity = 48;
        record.days_old = 10;
        record.recompute_derived();

        assert!((record.fork_rate - 0.1).abs() < 1e-9);
        assert!((record.popularity_score - (24.0 + 90.0 + 6.0)).abs() < 1e-9);
        assert!((record.stars_per_day - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_label_integer_encoding() {
        assert_eq!(TrendLabel::Pending.as_i8(), -1);
        assert_eq!(TrendLabel::try_from(1i8), Ok(TrendLabel::Trending));
        assert!(TrendLabel::try_from(2i8).is_err());
        assert!(!TrendLabel::Pending.is_resolved());

        let json = serde_json::to_string(&TrendLabel::NotTrending).unwrap();
        assert_eq!(json, "0");
    }

    #[test]
    fn test_repo_name_validation() {
        assert!(is_valid_repo_name("rust-lang/rust"));
        assert!(!is_valid_repo_name("rust-lang"));
        assert!(!is_valid_repo_name("a/b/c"));
        assert!(!is_valid_repo_name("/rust"));
        assert!(!is_valid_repo_name("a /b"));
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(EventKind::from_archive_type("WatchEvent"), EventKind::Star);
        assert_eq!(EventKind::from_archive_type("PushEvent"), EventKind::Push);
        assert_eq!(EventKind::from_archive_type("ForkEvent"), EventKind::Other);
    }

    #[test]
    fn test_label_distribution() {
        let mut a = FeatureRecord::unlabeled("a/b", date("2024-12-01"));
        let mut b = a.clone();
        let c = a.clone();
        a.is_trending = TrendLabel::Trending;
        b.is_trending = TrendLabel::NotTrending;

        let dist = LabelDistribution::from_records(&[a, b, c]);
        assert_eq!(dist, LabelDistribution { trending: 1, not_trending: 1, pending: 1 });
        assert_eq!(dist.total(), 3);
    }
}
