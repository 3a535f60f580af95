//! Hacker News mentions of GitHub repositories

use super::BuzzSource;
use crate::error::{Result, TrendError};
use crate::model::BuzzTable;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

const SOURCE: &str = "hackernews";

lazy_static! {
    static ref GITHUB_REPO_URL: Regex =
        Regex::new(r"github\.com/([^/?#\s]+)/([^/?#\s]+)").expect("valid regex");
}

#[derive(Debug, Default, Deserialize)]
struct Item {
    url: Option<String>,
    #[serde(default)]
    score: u64,
    #[serde(default)]
    descendants: u64,
}

pub struct HackerNewsClient {
    client: Client,
    base_url: String,
    story_limit: usize,
}

impl HackerNewsClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://hacker-news.firebaseio.com/v0";

    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            story_limit: 200,
        }
    }

    pub fn with_story_limit(mut self, story_limit: usize) -> Self {
        self.story_limit = story_limit;
        self
    }

    async fn top_story_ids(&self) -> Result<Vec<u64>> {
        let url = format!("{}/topstories.json", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(TrendError::unavailable(
                SOURCE,
                format!("status {} for top stories", response.status()),
            ));
        }
        let mut ids: Vec<u64> = response.json().await?;
        ids.truncate(self.story_limit);
        Ok(ids)
    }

    async fn item(&self, id: u64) -> Result<Item> {
        let url = format!("{}/item/{}.json", self.base_url, id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(TrendError::unavailable(
                SOURCE,
                format!("status {} for item {}", response.status(), id),
            ));
        }
        // Deleted items come back as `null`
        let item: Option<Item> = response.json().await?;
        Ok(item.unwrap_or_default())
    }
}

#[async_trait]
impl BuzzSource for HackerNewsClient {
    async fn get_mentions(&self) -> Result<BuzzTable> {
        let ids = self.top_story_ids().await?;
        info!(stories = ids.len(), "Scanning top stories for GitHub links");

        let mut buzz = BuzzTable::new();
        for id in ids {
            let item = match self.item(id).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(item = id, error = %e, "Skipping story");
                    continue;
                }
            };
            if let Some(repo_name) = item.url.as_deref().and_then(repo_from_url) {
                *buzz.entry(repo_name).or_insert(0.0) += buzz_score(item.score, item.descendants);
            }
        }

        debug!(repos = buzz.len(), "Collected GitHub mentions");
        Ok(buzz)
    }
}

/// Score plus twice the comment count.
pub fn buzz_score(score: u64, comments: u64) -> f64 {
    score as f64 + 2.0 * comments as f64
}

/// `https://github.com/owner/name/tree/main?x=y` -> `owner/name`
pub fn repo_from_url(url: &str) -> Option<String> {
    let caps = GITHUB_REPO_URL.captures(url)?;
    let owner = caps.get(1)?.as_str();
    let name = caps.get(2)?.as_str().trim_end_matches(".git");
    if name.is_empty() {
        return None;
    }
    Some(format!("{}/{}", owner, name))
}
