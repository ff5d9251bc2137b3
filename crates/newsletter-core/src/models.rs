use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaking rate used to size short-video scripts.
pub const WORDS_PER_MINUTE: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Mail,
    Feed,
    File,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Mail => "mail",
            SourceType::Feed => "feed",
            SourceType::File => "file",
        };
        f.write_str(name)
    }
}

/// A normalized newsletter item. `content` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterItem {
    pub source_name: String,
    pub source_type: SourceType,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_markup: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    /// Source names of near-duplicates folded into this item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_sources: Vec<String>,
}

impl NewsletterItem {
    /// Every source this item is attributed to, primary first.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.source_name.as_str()).chain(self.merged_sources.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicGroup {
    pub topic_label: String,
    pub description: String,
    /// Ordered, primary item first. Never empty.
    pub members: Vec<NewsletterItem>,
    pub key_points: Vec<String>,
}

impl TopicGroup {
    pub fn primary(&self) -> Option<&NewsletterItem> {
        self.members.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Smallest range covering every timestamp, or `None` for an empty input.
    pub fn covering<I>(timestamps: I) -> Option<Self>
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        timestamps.into_iter().fold(None, |range, ts| match range {
            None => Some(DateRange { start: ts, end: ts }),
            Some(r) => Some(DateRange {
                start: r.start.min(ts),
                end: r.end.max(ts),
            }),
        })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedContent {
    pub topics: Vec<TopicGroup>,
    pub overall_summary: String,
    pub trending_themes: BTreeSet<String>,
    pub source_count: usize,
    pub date_range: Option<DateRange>,
}

impl SynthesizedContent {
    pub fn empty() -> Self {
        Self {
            topics: Vec::new(),
            overall_summary: String::new(),
            trending_themes: BTreeSet::new(),
            source_count: 0,
            date_range: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Distinct source names across all topics, including merged duplicates.
    pub fn sources(&self) -> BTreeSet<String> {
        self.topics
            .iter()
            .flat_map(|t| t.members.iter())
            .flat_map(|item| item.sources())
            .map(str::to_string)
            .collect()
    }

    pub fn key_points(&self) -> impl Iterator<Item = &str> {
        self.topics
            .iter()
            .flat_map(|t| t.key_points.iter())
            .map(String::as_str)
    }
}

/// Whitespace-separated tokens that carry at least one letter or digit.
/// Markdown markers such as `#`, `-` and `**` on their own are not words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BlogPostRecord")]
pub struct BlogPost {
    pub title: String,
    markdown_body: String,
    word_count: usize,
    pub sources: BTreeSet<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct BlogPostRecord {
    title: String,
    markdown_body: String,
    #[serde(default)]
    sources: BTreeSet<String>,
    generated_at: DateTime<Utc>,
}

impl From<BlogPostRecord> for BlogPost {
    fn from(r: BlogPostRecord) -> Self {
        BlogPost::new(r.title, r.markdown_body, r.sources, r.generated_at)
    }
}

impl BlogPost {
    pub fn new(
        title: impl Into<String>,
        markdown_body: impl Into<String>,
        sources: BTreeSet<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let markdown_body = markdown_body.into();
        let word_count = count_words(&markdown_body);
        Self {
            title: title.into(),
            markdown_body,
            word_count,
            sources,
            generated_at,
        }
    }

    pub fn markdown_body(&self) -> &str {
        &self.markdown_body
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortVideoScript {
    pub title: String,
    pub hook: String,
    pub main_points: Vec<String>,
    pub call_to_action: String,
    /// Present only when visual cues were requested.
    #[serde(default)]
    pub visual_cues: Option<Vec<String>>,
    pub target_duration_seconds: u32,
    pub full_script: String,
    pub generated_at: DateTime<Utc>,
}

impl ShortVideoScript {
    /// Words actually spoken: hook, main points and call to action.
    pub fn spoken_word_count(&self) -> usize {
        count_words(&self.hook)
            + self.main_points.iter().map(|p| count_words(p)).sum::<usize>()
            + count_words(&self.call_to_action)
    }

    pub fn estimated_seconds(&self) -> f64 {
        self.spoken_word_count() as f64 * 60.0 / WORDS_PER_MINUTE as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    pub success: bool,
    pub remote_id: Option<String>,
    pub target_folder: String,
    pub error: Option<String>,
    pub fallback_path: Option<PathBuf>,
}

impl ExportResult {
    pub fn exported(target_folder: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            success: true,
            remote_id: Some(remote_id.into()),
            target_folder: target_folder.into(),
            error: None,
            fallback_path: None,
        }
    }

    /// Nothing was persisted because the run was a dry run.
    pub fn skipped(target_folder: impl Into<String>) -> Self {
        Self {
            success: true,
            remote_id: None,
            target_folder: target_folder.into(),
            error: None,
            fallback_path: None,
        }
    }

    pub fn fallback(
        target_folder: impl Into<String>,
        fallback_path: PathBuf,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            remote_id: None,
            target_folder: target_folder.into(),
            error: Some(error.into()),
            fallback_path: Some(fallback_path),
        }
    }

    pub fn failed(target_folder: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            remote_id: None,
            target_folder: target_folder.into(),
            error: Some(error.into()),
            fallback_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_name: String,
    pub message: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub items_processed: usize,
    pub blog_export: Option<ExportResult>,
    pub script_export: Option<ExportResult>,
    /// Source failures, timeouts and exports that could not be saved at all.
    pub errors: Vec<String>,
    /// Notices that leave the run successful, such as a fallback export.
    #[serde(default)]
    pub warnings: Vec<String>,
    pub dry_run: bool,
    #[serde(default)]
    pub source_failures: Vec<SourceFailure>,
    #[serde(default)]
    pub blog: Option<BlogPost>,
    #[serde(default)]
    pub script: Option<ShortVideoScript>,
}
