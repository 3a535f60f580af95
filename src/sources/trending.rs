//! GitHub trending page snapshot

use super::TrendingSource;
use crate::error::{Result, TrendError};
use crate::retry::{is_transient, RetryPolicy};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use tracing::info;

const SOURCE: &str = "trending";

lazy_static! {
    // Each repository row carries its `owner/name` link inside the <h2> heading
    static ref HEADING_LINK: Regex = Regex::new(
        r#"(?s)<h2[^>]*>\s*<a[^>]*?href="/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)""#
    )
    .expect("valid regex");
}

pub struct TrendingPageClient {
    client: Client,
    url: String,
    since: String,
    retry: RetryPolicy,
}

impl TrendingPageClient {
    pub const DEFAULT_URL: &'static str = "https://github.com/trending";

    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            url: Self::DEFAULT_URL.to_string(),
            since: "daily".to_string(),
            retry,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn fetch_once(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("since", self.since.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TrendError::unavailable(
                SOURCE,
                format!("status {}", response.status()),
            ));
        }

        let html = response.text().await?;
        let repos = parse_trending_page(&html);
        if repos.is_empty() {
            return Err(TrendError::unavailable(SOURCE, "no repositories on page"));
        }
        Ok(repos)
    }
}

#[async_trait]
impl TrendingSource for TrendingPageClient {
    async fn get_current(&self) -> Result<Vec<String>> {
        let repos = self
            .retry
            .retry_with_backoff("trending snapshot", || self.fetch_once(), is_transient)
            .await?;
        info!(repos = repos.len(), "Fetched trending snapshot");
        Ok(repos)
    }
}

/// Repository names in page order, duplicates removed.
pub fn parse_trending_page(html: &str) -> Vec<String> {
    let mut repos: Vec<String> = Vec::new();
    for caps in HEADING_LINK.captures_iter(html) {
        let name = format!("{}/{}", &caps[1], &caps[2]);
        if !repos.contains(&name) {
            repos.push(name);
        }
    }
    repos
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <article class="Box-row">
          <h2 class="h3 lh-condensed">
            <a data-view-component="true" href="/astral-sh/uv" class="Link">
              <span class="text-normal">astral-sh /</span> uv
            </a>
          </h2>
          <p class="col-9">An extremely fast Python package manager.</p>
        </article>
        <article class="Box-row">
          <h2 class="h3 lh-condensed">
            <a href="/rust-lang/rust" class="Link">rust</a>
          </h2>
          <a href="/rust-lang/rust/stargazers">stars</a>
        </article>
    "#;

    #[test]
    fn test_parse_trending_page_preserves_order() {
        assert_eq!(parse_trending_page(PAGE), vec!["astral-sh/uv", "rust-lang/rust"]);
    }

    #[test]
    fn test_parse_trending_page_empty() {
        assert!(parse_trending_page("<html><body>Nothing here</body></html>").is_empty());
    }
}
