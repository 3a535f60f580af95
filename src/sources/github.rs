//! GitHub REST metadata client

use super::MetadataSource;
use crate::error::{Result, TrendError};
use crate::model::RepoMetadata;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

const SOURCE: &str = "github";

#[derive(Debug, Deserialize)]
struct RepoResponse {
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    language: Option<String>,
    created_at: Option<String>,
}

impl From<RepoResponse> for RepoMetadata {
    fn from(response: RepoResponse) -> Self {
        RepoMetadata {
            stars_total: response.stargazers_count,
            forks_total: response.forks_count,
            language: response.language,
            created_at: response.created_at,
        }
    }
}

pub struct GitHubMetadataClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubMetadataClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.github.com";

    pub fn new(client: Client, token: Option<String>) -> Self {
        if token.is_none() {
            warn!("No GITHUB_TOKEN provided; API rate limits will be severely restricted");
        }
        Self {
            client,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            token,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl MetadataSource for GitHubMetadataClient {
    async fn get(&self, repo_name: &str) -> Result<RepoMetadata> {
        let url = format!("{}/repos/{}", self.base_url, repo_name);
        debug!(repo = repo_name, "Fetching repository metadata");

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: RepoResponse = response.json().await?;
                Ok(body.into())
            }
            StatusCode::FORBIDDEN => Err(TrendError::unavailable(
                SOURCE,
                format!("rate limit exceeded or forbidden for {}", repo_name),
            )),
            status => Err(TrendError::unavailable(
                SOURCE,
                format!("status {} for {}", status, repo_name),
            )),
        }
    }
}
