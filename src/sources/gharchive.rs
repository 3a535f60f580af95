//! GH Archive hourly event dumps
//!
//! Each hour is a gzip-compressed file with one JSON event per line.

use super::EventArchive;
use crate::error::{Result, TrendError};
use crate::model::{ArchiveEvent, EventKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use reqwest::Client;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use tracing::{debug, info};

const SOURCE: &str = "gharchive";

pub struct GhArchiveClient {
    client: Client,
    base_url: String,
}

impl GhArchiveClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://data.gharchive.org";

    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Hour is not zero-padded in archive file names.
    pub fn hour_url(&self, date: NaiveDate, hour: u32) -> String {
        format!("{}/{}-{}.json.gz", self.base_url, date.format("%Y-%m-%d"), hour)
    }
}

#[async_trait]
impl EventArchive for GhArchiveClient {
    async fn fetch_hour(&self, date: NaiveDate, hour: u32) -> Result<Vec<ArchiveEvent>> {
        let url = self.hour_url(date, hour);
        info!(url = %url, "Fetching archive hour");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrendError::unavailable(
                SOURCE,
                format!("status {} for {}", status, url),
            ));
        }

        let body = response.bytes().await?;
        // Decompression is CPU bound; keep it off the async workers
        let events = tokio::task::spawn_blocking(move || decode_events(&body))
            .await
            .map_err(|e| TrendError::unavailable(SOURCE, format!("decode task failed: {}", e)))??;

        debug!(url = %url, events = events.len(), "Decoded archive hour");
        Ok(events)
    }
}

/// Decodes a gzip body of JSON lines. Lines that do not parse are dropped;
/// a corrupt gzip stream fails the whole hour.
pub fn decode_events(gzipped: &[u8]) -> Result<Vec<ArchiveEvent>> {
    let reader = BufReader::new(GzDecoder::new(gzipped));
    let mut events = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| TrendError::unavailable(SOURCE, format!("gzip: {}", e)))?;
        if let Some(event) = parse_event_line(&line) {
            // Only star/push events feed the rate table
            if event.kind != EventKind::Other {
                events.push(event);
            }
        }
    }

    Ok(events)
}

/// `repo` is usually an object with a `name`, occasionally a bare string.
pub fn parse_event_line(line: &str) -> Option<ArchiveEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let kind = EventKind::from_archive_type(value.get("type")?.as_str()?);
    let repo_name = match value.get("repo") {
        Some(Value::Object(repo)) => repo.get("name").and_then(Value::as_str).map(str::to_string),
        Some(Value::String(name)) => Some(name.clone()),
        _ => None,
    };
    Some(ArchiveEvent { kind, repo_name })
}
