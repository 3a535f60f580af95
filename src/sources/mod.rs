//! External collaborators
//!
//! Each source is an abstract interface; the engine only depends on the data
//! contract. Default HTTP implementations:
//! - GitHubMetadataClient: repository metadata from the GitHub REST API
//! - GhArchiveClient: hourly public event dumps
//! - HackerNewsClient: GitHub mentions among top stories
//! - TrendingPageClient: today's trending snapshot

pub mod gharchive;
pub mod github;
pub mod hackernews;
pub mod trending;

pub use gharchive::GhArchiveClient;
pub use github::GitHubMetadataClient;
pub use hackernews::HackerNewsClient;
pub use trending::TrendingPageClient;

use crate::error::Result;
use crate::model::{ArchiveEvent, BuzzTable, RepoMetadata};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

/// Repository metadata (stars, forks, language, creation time).
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn get(&self, repo_name: &str) -> Result<RepoMetadata>;
}

/// Raw event stream bucketed by (date, hour-of-day).
#[async_trait]
pub trait EventArchive: Send + Sync {
    async fn fetch_hour(&self, date: NaiveDate, hour: u32) -> Result<Vec<ArchiveEvent>>;
}

/// Mention feed aggregated into a per-repository buzz score.
#[async_trait]
pub trait BuzzSource: Send + Sync {
    async fn get_mentions(&self) -> Result<BuzzTable>;
}

/// Ordered list of repositories currently trending.
#[async_trait]
pub trait TrendingSource: Send + Sync {
    async fn get_current(&self) -> Result<Vec<String>>;
}

/// The full set of collaborators a pipeline run needs.
#[derive(Clone)]
pub struct Sources {
    pub metadata: Arc<dyn MetadataSource>,
    pub archive: Arc<dyn EventArchive>,
    pub buzz: Arc<dyn BuzzSource>,
    pub trending: Arc<dyn TrendingSource>,
}

pub(crate) const USER_AGENT: &str = concat!("trendlens/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client for the default collaborators.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}
