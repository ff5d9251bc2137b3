//! Source fetchers: each one retrieves raw newsletter records from a single
//! configured origin. Fetchers never normalize; that happens in
//! [`crate::parser`] once all of them have returned.

mod feed;
mod file;
mod mail;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::error::SourceError;
use crate::models::SourceType;

pub use feed::FeedFetcher;
pub use file::FileFetcher;
pub use mail::MailFetcher;

/// Body of a fetched record before text extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    Markup(String),
    Plain(String),
}

/// One record as retrieved from a source.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub source_name: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub body: RecordBody,
    /// Timestamp the source reported directly.
    pub published_at: Option<DateTime<Utc>>,
    /// Unparsed date text, used when `published_at` is missing.
    pub date_hint: Option<String>,
    /// When the record was retrieved (or last modified, for files).
    pub fetched_at: DateTime<Utc>,
    pub author: Option<String>,
    pub origin_url: Option<String>,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Name used for attribution and failure reporting.
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError>;
}

/// Builds one fetcher per configured source, mail first, then feeds, then files.
pub fn build_fetchers(config: &AppConfig) -> Result<Vec<Arc<dyn SourceFetcher>>> {
    let mut fetchers: Vec<Arc<dyn SourceFetcher>> = Vec::with_capacity(config.source_count());

    for source in &config.email_sources {
        fetchers.push(Arc::new(MailFetcher::new(source.clone())));
    }
    for source in &config.rss_sources {
        fetchers.push(Arc::new(FeedFetcher::new(source.clone())?));
    }
    for source in &config.file_sources {
        fetchers.push(Arc::new(FileFetcher::new(source.clone())));
    }

    Ok(fetchers)
}
