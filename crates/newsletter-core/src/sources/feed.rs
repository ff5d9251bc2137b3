use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use super::{RawRecord, RecordBody, SourceFetcher};
use crate::config::RssSourceConfig;
use crate::error::SourceError;
use crate::models::SourceType;

/// Fetches RSS, Atom and JSON Feed documents.
pub struct FeedFetcher {
    client: Client,
    config: RssSourceConfig,
}

impl FeedFetcher {
    pub fn new(config: RssSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; NewsletterGenerator/0.1)")
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn parse_feed(
        &self,
        bytes: &[u8],
        since: DateTime<Utc>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let feed = feed_rs::parser::parse(bytes)
            .map_err(|e| SourceError::parse(&self.config.name, e))?;

        let mut records = Vec::with_capacity(feed.entries.len());
        for entry in feed.entries {
            let published_at = entry.published.or(entry.updated);
            if published_at.is_some_and(|ts| ts < since) {
                continue;
            }

            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .map(RecordBody::Markup)
                .unwrap_or_else(|| RecordBody::Plain(String::new()));

            records.push(RawRecord {
                source_name: self.config.name.clone(),
                source_type: SourceType::Feed,
                title: entry.title.map(|t| t.content),
                body,
                published_at,
                date_hint: None,
                fetched_at,
                author: entry.authors.into_iter().next().map(|p| p.name),
                origin_url: entry.links.into_iter().next().map(|l| l.href),
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Feed
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        let name = &self.config.name;
        debug!(source = %name, url = %self.config.url, "fetching feed");

        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| SourceError::connectivity(name, e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SourceError::auth(name, format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(SourceError::connectivity(name, format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::connectivity(name, e))?;

        let records = self.parse_feed(&bytes, since, Utc::now())?;
        info!(source = %name, count = records.len(), "fetched feed entries");
        Ok(records)
    }
}
