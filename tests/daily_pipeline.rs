mod common;

use common::*;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use trendlens::sink::FeatureSink;
use trendlens::{
    MemorySink, Pipeline, PipelineOptions, StagingArea, TrendError, TrendLabel, TrendingHistory,
};

struct Harness {
    _dir: TempDir,
    pipeline: Pipeline,
    trending: Arc<FakeTrending>,
    sink: Arc<MemorySink>,
    staging: StagingArea,
}

fn harness(archive: FakeArchive, enable_buzz: bool) -> Harness {
    harness_with(archive, options(enable_buzz))
}

fn harness_with(archive: FakeArchive, options: PipelineOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let trending = Arc::new(FakeTrending::default());
    let sink = Arc::new(MemorySink::new());
    let staging = StagingArea::new(dir.path());

    let metadata = FakeMetadata::default()
        .with("acme/rocket", 500, 50, "Rust", "2024-10-02T00:00:00Z")
        .with("acme/widget", 80, 40, "Go", "2024-11-21T00:00:00Z")
        .with("acme/gizmo", 10, 0, "Python", "2024-11-01T00:00:00Z");
    let buzz = FakeBuzz::default().with("acme/rocket", 75.0);

    let pipeline = Pipeline::new(
        sources(metadata, Arc::new(archive), buzz, trending.clone()),
        TrendingHistory::open_in(dir.path()),
        staging.clone(),
        sink.clone(),
        options,
    );

    Harness {
        _dir: dir,
        pipeline,
        trending,
        sink,
        staging,
    }
}

#[tokio::test]
async fn test_daily_run_publishes_unlabeled_and_stages_copy() {
    // A run at 10:00 samples hours 12 and 23 of the previous day
    let archive = FakeArchive::default()
        .stars("2024-11-30", 12, "acme/rocket", 3)
        .stars("2024-11-30", 23, "acme/rocket", 1)
        .pushes("2024-11-30", 23, "acme/rocket", 2);
    let mut h = harness(archive, true);
    h.trending.set(&["acme/rocket", "missing/repo"]);

    let summary = h.pipeline.run_daily(at("2024-12-01", 10)).await.unwrap();

    assert_eq!(summary.repos_collected, 2);
    assert_eq!(summary.enrichment_failures, 0);
    assert_eq!(summary.unlabeled_published, 2);
    assert_eq!(summary.labeled_published, 0);
    assert_eq!(summary.labeled_date, None);
    assert!(h.staging.exists(date("2024-12-01")));

    let rocket = h.sink.get("acme/rocket", date("2024-12-01")).unwrap();
    assert_eq!(rocket.is_trending, TrendLabel::Pending);
    assert_eq!(rocket.star_velocity, 48);
    assert_eq!(rocket.commit_frequency, 24);
    assert_eq!(rocket.buzz_score, 75.0);
    assert_eq!(rocket.days_old, 60);

    // Metadata failure keeps the record with defaults
    let missing = h.sink.get("missing/repo", date("2024-12-01")).unwrap();
    assert_eq!(missing.stars_total, 0);
    assert_eq!(missing.forks_total, 0);
    assert_eq!(missing.language, "Unknown");
    assert_eq!(missing.days_old, 0);

    assert_eq!(
        h.pipeline.history().get(date("2024-12-01")),
        Some(&names(&["acme/rocket", "missing/repo"])[..])
    );
}

#[tokio::test]
async fn test_daily_runs_label_the_copy_from_lookback_days_ago() {
    let mut h = harness(FakeArchive::default(), false);
    let days = [
        ("2024-12-01", vec!["acme/rocket", "acme/widget"]),
        ("2024-12-02", vec!["acme/gizmo"]),
        ("2024-12-03", vec!["acme/gizmo"]),
        ("2024-12-04", vec!["acme/gizmo"]),
        ("2024-12-05", vec!["acme/gizmo"]),
        ("2024-12-06", vec!["acme/gizmo"]),
        ("2024-12-07", vec!["acme/gizmo"]),
    ];
    for (day, repos) in &days {
        h.trending.set(repos);
        let summary = h.pipeline.run_daily(at(day, 9)).await.unwrap();
        assert_eq!(summary.labeled_published, 0, "nothing to label on {}", day);
    }
    assert!(!h.pipeline.label_status(date("2024-12-01")).can_label);

    h.trending.set(&["acme/rocket"]);
    let summary = h.pipeline.run_daily(at("2024-12-08", 9)).await.unwrap();

    assert_eq!(summary.labeled_date, Some(date("2024-12-01")));
    assert_eq!(summary.labeled_published, 2);
    assert_eq!(summary.labels.trending, 1);
    assert_eq!(summary.labels.not_trending, 1);

    // Same-day appearances on 12-01 do not count; the last day of the window does
    let rocket = h.sink.get("acme/rocket", date("2024-12-01")).unwrap();
    let widget = h.sink.get("acme/widget", date("2024-12-01")).unwrap();
    assert_eq!(rocket.is_trending, TrendLabel::Trending);
    assert_eq!(widget.is_trending, TrendLabel::NotTrending);

    // Labeled rows replace the unlabeled rows in place
    assert_eq!(h.sink.read_range(Some(date("2024-12-01")), Some(date("2024-12-01"))).unwrap().len(), 2);
    assert!(!h.staging.exists(date("2024-12-01")));
    assert!(h.staging.exists(date("2024-12-08")));
}

#[tokio::test]
async fn test_rerunning_the_same_day_overwrites() {
    let mut h = harness(FakeArchive::default(), false);

    h.trending.set(&["acme/rocket", "acme/widget"]);
    h.pipeline.run_daily(at("2024-12-01", 9)).await.unwrap();
    h.trending.set(&["acme/gizmo"]);
    h.pipeline.run_daily(at("2024-12-01", 18)).await.unwrap();

    assert_eq!(h.pipeline.history().len(), 1);
    assert_eq!(
        h.pipeline.history().members_in_range(date("2024-12-01"), date("2024-12-01")),
        ["acme/gizmo".to_string()].into_iter().collect::<HashSet<_>>()
    );
    assert_eq!(h.staging.load(date("2024-12-01")).unwrap().unwrap().len(), 1);
    // The sink keeps both upserts keyed by repository
    assert_eq!(h.sink.len(), 3);
}

#[tokio::test]
async fn test_trending_failure_aborts_without_side_effects() {
    let mut h = harness(FakeArchive::default(), false);
    h.trending.fail();

    let err = h.pipeline.run_daily(at("2024-12-01", 9)).await.unwrap_err();
    assert!(err.is_structural());
    assert!(h.pipeline.history().is_empty());
    assert!(h.sink.is_empty());
    assert!(!h.staging.exists(date("2024-12-01")));
}

#[tokio::test]
async fn test_empty_snapshot_aborts() {
    let mut h = harness(FakeArchive::default(), false);
    h.trending.set(&[]);
    assert!(h.pipeline.run_daily(at("2024-12-01", 9)).await.is_err());
}

#[tokio::test]
async fn test_malformed_staging_copy_is_structural() {
    let mut h = harness(FakeArchive::default(), false);
    std::fs::write(
        h.staging.path_for(date("2024-11-24")),
        "repo_name,collection_date\nacme/rocket,2024-11-24\n",
    )
    .unwrap();

    h.trending.set(&["acme/rocket"]);
    let err = h.pipeline.run_daily(at("2024-12-01", 9)).await.unwrap_err();
    assert!(err.is_structural());

    // Today's work was published before the labeling step failed
    assert_eq!(h.sink.len(), 1);
    assert!(h.staging.exists(date("2024-11-24")));
}

#[tokio::test]
async fn test_zero_lookback_is_rejected_before_any_write() {
    let mut opts = options(false);
    opts.lookback_days = 0;
    let mut h = harness_with(FakeArchive::default(), opts);
    h.trending.set(&["acme/rocket"]);

    let err = h.pipeline.run_daily(at("2024-12-01", 9)).await.unwrap_err();
    assert!(matches!(err, TrendError::Config(_)));

    // Today's rows were never labeled against an empty window
    assert!(h.sink.is_empty());
    assert!(h.pipeline.history().is_empty());
    assert!(!h.staging.exists(date("2024-12-01")));
}
