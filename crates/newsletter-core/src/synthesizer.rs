//! Turns normalized items into topics, key points and an overall summary.
//!
//! Each LLM-backed step has a deterministic fallback, so synthesis always
//! produces a [`SynthesizedContent`] for a non-empty input.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::clustering::TopicClusterer;
use crate::config::LlmConfig;
use crate::llm::{extract_json, parse_bullets, truncate, LlmClient};
use crate::models::{DateRange, NewsletterItem, SynthesizedContent, TopicGroup};

const MAX_KEY_POINTS: usize = 5;
const MAX_THEMES: usize = 5;
const ITEM_EXCERPT_BYTES: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStage {
    Idle,
    Grouping,
    KeyPointExtraction,
    Summarizing,
    Done,
}

impl fmt::Display for SynthesisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynthesisStage::Idle => "idle",
            SynthesisStage::Grouping => "grouping",
            SynthesisStage::KeyPointExtraction => "key point extraction",
            SynthesisStage::Summarizing => "summarizing",
            SynthesisStage::Done => "done",
        };
        f.write_str(name)
    }
}

pub type StageObserver = Box<dyn Fn(SynthesisStage) + Send + Sync>;

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
    #[serde(default)]
    trending_themes: Vec<String>,
}

pub struct ContentSynthesizer {
    llm: Arc<dyn LlmClient>,
    clusterer: TopicClusterer,
    max_concurrency: usize,
    observer: Option<StageObserver>,
}

impl ContentSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self {
            clusterer: TopicClusterer::new(llm.clone(), config),
            llm,
            max_concurrency: config.max_concurrency.max(1),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn enter(&self, stage: SynthesisStage) {
        debug!(%stage, "synthesis stage");
        if let Some(observer) = &self.observer {
            observer(stage);
        }
    }

    pub async fn synthesize(&self, items: Vec<NewsletterItem>) -> SynthesizedContent {
        self.enter(SynthesisStage::Idle);
        if items.is_empty() {
            self.enter(SynthesisStage::Done);
            return SynthesizedContent::empty();
        }

        let date_range = DateRange::covering(items.iter().map(|i| i.published_at));
        let item_count = items.len();

        self.enter(SynthesisStage::Grouping);
        let groups = self.clusterer.group_by_topic(items).await;

        self.enter(SynthesisStage::KeyPointExtraction);
        let topics: Vec<TopicGroup> = stream::iter(groups)
            .map(|mut group| async move {
                group.key_points = self.extract_key_points(&group).await;
                group
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        self.enter(SynthesisStage::Summarizing);
        let (overall_summary, trending_themes) = self.generate_summary(&topics).await;

        let mut content = SynthesizedContent {
            topics,
            overall_summary,
            trending_themes,
            source_count: 0,
            date_range,
        };
        content.source_count = content.sources().len();

        self.enter(SynthesisStage::Done);
        info!(
            items = item_count,
            topics = content.topics.len(),
            sources = content.source_count,
            "synthesis complete"
        );
        content
    }

    /// Ordered claims for one topic, falling back to member titles.
    pub async fn extract_key_points(&self, group: &TopicGroup) -> Vec<String> {
        let articles = group
            .members
            .iter()
            .map(|item| {
                format!(
                    "Title: {}\nSource: {}\n{}",
                    item.title,
                    item.source_name,
                    truncate(&item.content, ITEM_EXCERPT_BYTES)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let prompt = format!(
            r#"Extract the key points for the topic "{}" from the newsletter items below.

RULES:
1. At most {} points, most important first
2. Each point must be under 25 words
3. Use ONLY information from the items - no external knowledge
4. Format: Bullet points using dashes (-)

Items:
{}"#,
            group.topic_label, MAX_KEY_POINTS, articles
        );

        match self.llm.complete(&prompt, None).await {
            Ok(text) => {
                let mut points = parse_bullets(&text);
                points.truncate(MAX_KEY_POINTS);
                if points.is_empty() {
                    warn!(topic = %group.topic_label, "no key points in response, using titles");
                    title_points(group)
                } else {
                    points
                }
            }
            Err(e) => {
                warn!(topic = %group.topic_label, error = %e, "key point extraction failed, using titles");
                title_points(group)
            }
        }
    }

    /// Overall summary and trending themes from every topic's key points.
    pub async fn generate_summary(&self, topics: &[TopicGroup]) -> (String, BTreeSet<String>) {
        if topics.is_empty() {
            return (String::new(), BTreeSet::new());
        }

        let outline = topics
            .iter()
            .map(|t| {
                let points = t
                    .key_points
                    .iter()
                    .map(|p| format!("  - {}", p))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{}:\n{}", t.topic_label, points)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"Here are this period's newsletter topics and their key points:

{}

Write a 2-3 sentence overview of the period and name up to {} trending themes.

Format your response as JSON:
{{"summary": "...", "trending_themes": ["...", "..."]}}"#,
            outline, MAX_THEMES
        );

        match self.llm.complete(&prompt, None).await {
            Ok(text) => match serde_json::from_str::<SummaryResponse>(extract_json(&text)) {
                Ok(parsed) if !parsed.summary.trim().is_empty() => {
                    let mut themes: BTreeSet<String> = parsed
                        .trending_themes
                        .into_iter()
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .take(MAX_THEMES)
                        .collect();
                    if themes.is_empty() {
                        themes = label_themes(topics);
                    }
                    (parsed.summary.trim().to_string(), themes)
                }
                _ => {
                    debug!("summary response was not JSON, using it verbatim");
                    (text.trim().to_string(), label_themes(topics))
                }
            },
            Err(e) => {
                warn!(error = %e, "summary generation failed, composing from topic labels");
                (fallback_summary(topics), label_themes(topics))
            }
        }
    }
}

fn title_points(group: &TopicGroup) -> Vec<String> {
    group
        .members
        .iter()
        .map(|item| item.title.clone())
        .take(MAX_KEY_POINTS)
        .collect()
}

fn label_themes(topics: &[TopicGroup]) -> BTreeSet<String> {
    topics
        .iter()
        .map(|t| t.topic_label.clone())
        .take(MAX_THEMES)
        .collect()
}

fn fallback_summary(topics: &[TopicGroup]) -> String {
    let sources: BTreeSet<&str> = topics
        .iter()
        .flat_map(|t| t.members.iter())
        .flat_map(|i| i.sources())
        .collect();
    let labels = topics
        .iter()
        .map(|t| t.topic_label.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "This edition covers {} topics from {} sources: {}.",
        topics.len(),
        sources.len(),
        labels
    )
}
