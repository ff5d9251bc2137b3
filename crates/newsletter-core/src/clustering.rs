use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::llm::{extract_json, truncate, LlmClient};
use crate::models::{NewsletterItem, TopicGroup};

/// Label for items the model did not place in any topic.
pub const UNCATEGORIZED: &str = "Uncategorized";

const EXCERPT_BYTES: usize = 400;
/// Tokens reserved for instructions and the answer.
const PROMPT_OVERHEAD_TOKENS: usize = 600;
const TITLE_SIMILARITY: f64 = 0.8;
const MIN_TITLE_TOKENS: usize = 3;
const FINGERPRINT_CHARS: usize = 200;
const MIN_FINGERPRINT_CHARS: usize = 100;

const SYSTEM_PROMPT: &str =
    "You are an editor organizing a week of newsletter items into topics. Answer with JSON only.";

#[derive(Deserialize)]
struct ClusteringResult {
    topics: Vec<TopicCluster>,
    #[serde(default)]
    duplicates: Vec<Vec<usize>>,
}

#[derive(Deserialize)]
struct TopicCluster {
    title: String,
    #[serde(default)]
    description: String,
    article_indices: Vec<usize>,
}

/// A topic with member indices into the full item list.
#[derive(Debug, Clone, PartialEq)]
struct Assignment {
    label: String,
    description: String,
    members: Vec<usize>,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    assignments: Vec<Assignment>,
    duplicates: Vec<Vec<usize>>,
}

/// Groups items into topics with the LLM and folds near-duplicates together.
pub struct TopicClusterer {
    llm: Arc<dyn LlmClient>,
    token_budget: usize,
    max_concurrency: usize,
}

impl TopicClusterer {
    pub fn new(llm: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self {
            llm,
            token_budget: config.batch_token_budget,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Every input item ends up in exactly one group, either on its own or
    /// folded into a near-duplicate. Key points are left empty.
    pub async fn group_by_topic(&self, items: Vec<NewsletterItem>) -> Vec<TopicGroup> {
        if items.is_empty() {
            return Vec::new();
        }

        let outcome = if items.len() == 1 {
            BatchOutcome {
                assignments: vec![Assignment {
                    label: items[0].title.clone(),
                    description: String::new(),
                    members: vec![0],
                }],
                duplicates: Vec::new(),
            }
        } else {
            self.assign(&items).await
        };

        let groups = build_groups(items, outcome);
        info!(topics = groups.len(), "grouped items by topic");
        groups
    }

    async fn assign(&self, items: &[NewsletterItem]) -> BatchOutcome {
        let batches = self.batches(items);
        debug!(batches = batches.len(), "clustering in batches");

        let outcomes: Vec<BatchOutcome> = stream::iter(batches)
            .map(|batch| self.cluster_batch(items, batch))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut merged = BatchOutcome::default();
        let mut by_label: HashMap<String, usize> = HashMap::new();
        for outcome in outcomes {
            for assignment in outcome.assignments {
                let key = assignment.label.to_lowercase();
                match by_label.get(&key) {
                    Some(&pos) => {
                        let existing = &mut merged.assignments[pos];
                        existing.members.extend(assignment.members);
                        if existing.description.is_empty() {
                            existing.description = assignment.description;
                        }
                    }
                    None => {
                        by_label.insert(key, merged.assignments.len());
                        merged.assignments.push(assignment);
                    }
                }
            }
            merged.duplicates.extend(outcome.duplicates);
        }
        merged
    }

    /// Splits item indices into batches that fit the token budget.
    fn batches(&self, items: &[NewsletterItem]) -> Vec<Vec<usize>> {
        let budget = self.token_budget.saturating_sub(PROMPT_OVERHEAD_TOKENS).max(1);
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut used = 0;

        for (idx, item) in items.iter().enumerate() {
            let cost = estimate_tokens(&item_line(0, item));
            if !current.is_empty() && used + cost > budget {
                batches.push(std::mem::take(&mut current));
                used = 0;
            }
            current.push(idx);
            used += cost;
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    async fn cluster_batch(&self, items: &[NewsletterItem], batch: Vec<usize>) -> BatchOutcome {
        if batch.len() == 1 {
            return singletons(items, &batch);
        }

        let prompt = clustering_prompt(items, &batch);
        let parsed = match self.llm.complete(&prompt, Some(SYSTEM_PROMPT)).await {
            Ok(text) => serde_json::from_str::<ClusteringResult>(extract_json(&text))
                .map_err(|e| format!("unparsable clustering response: {}", e)),
            Err(e) => Err(e.to_string()),
        };

        match parsed.map(|result| resolve_batch(result, &batch)) {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                warn!(size = batch.len(), "clustering response placed no items, one topic per item");
                singletons(items, &batch)
            }
            Err(e) => {
                warn!(size = batch.len(), error = %e, "clustering failed, one topic per item");
                singletons(items, &batch)
            }
        }
    }
}

fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

fn item_line(local_idx: usize, item: &NewsletterItem) -> String {
    let excerpt = truncate(&item.content, EXCERPT_BYTES).replace('\n', " ");
    format!(
        "{}. [{}] {}\n   {}",
        local_idx, item.source_name, item.title, excerpt
    )
}

fn clustering_prompt(items: &[NewsletterItem], batch: &[usize]) -> String {
    let listing = batch
        .iter()
        .enumerate()
        .map(|(local, &global)| item_line(local, &items[global]))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Group these newsletter items into topics.

RULES:
1. Items about the same subject, company or event belong in the same topic
2. Use concise topic titles (1-4 words) and a one-sentence description
3. List items that report the same story as near-duplicate groups
4. Every item index from 0 to {last} must appear in exactly one topic

Items:
{listing}

Format your response as JSON:
{{
  "topics": [
    {{"title": "AI Regulation", "description": "New rules for AI models.", "article_indices": [0, 2]}},
    {{"title": "Databases", "description": "Storage engine releases.", "article_indices": [1]}}
  ],
  "duplicates": [[0, 2]]
}}"#,
        last = batch.len() - 1,
        listing = listing
    )
}

/// Maps local indices back to global ones. First assignment wins; unplaced
/// items go to [`UNCATEGORIZED`]. `None` when nothing valid was placed.
fn resolve_batch(result: ClusteringResult, batch: &[usize]) -> Option<BatchOutcome> {
    let mut placed: HashSet<usize> = HashSet::new();
    let mut outcome = BatchOutcome::default();

    for cluster in result.topics {
        let members: Vec<usize> = cluster
            .article_indices
            .into_iter()
            .filter(|&local| local < batch.len() && placed.insert(local))
            .map(|local| batch[local])
            .collect();
        if members.is_empty() {
            continue;
        }
        let label = cluster.title.trim();
        outcome.assignments.push(Assignment {
            label: if label.is_empty() { UNCATEGORIZED.to_string() } else { label.to_string() },
            description: cluster.description.trim().to_string(),
            members,
        });
    }

    if outcome.assignments.is_empty() {
        return None;
    }

    let unplaced: Vec<usize> = (0..batch.len())
        .filter(|local| !placed.contains(local))
        .map(|local| batch[local])
        .collect();
    if !unplaced.is_empty() {
        debug!(count = unplaced.len(), "items left uncategorized");
        match outcome
            .assignments
            .iter_mut()
            .find(|a| a.label.eq_ignore_ascii_case(UNCATEGORIZED))
        {
            Some(existing) => existing.members.extend(unplaced),
            None => outcome.assignments.push(Assignment {
                label: UNCATEGORIZED.to_string(),
                description: "Items that did not fit another topic.".to_string(),
                members: unplaced,
            }),
        }
    }

    outcome.duplicates = result
        .duplicates
        .into_iter()
        .map(|group| {
            group
                .into_iter()
                .filter(|&local| local < batch.len())
                .map(|local| batch[local])
                .collect::<Vec<_>>()
        })
        .filter(|group| group.len() > 1)
        .collect();

    Some(outcome)
}

fn singletons(items: &[NewsletterItem], batch: &[usize]) -> BatchOutcome {
    BatchOutcome {
        assignments: batch
            .iter()
            .map(|&idx| Assignment {
                label: items[idx].title.clone(),
                description: String::new(),
                members: vec![idx],
            })
            .collect(),
        duplicates: Vec::new(),
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// The smaller index becomes the root so the earliest item stays primary.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (keep, absorb) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[absorb] = keep;
        }
    }
}

fn title_tokens(title: &str) -> BTreeSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn fingerprint(content: &str) -> String {
    content
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .take(FINGERPRINT_CHARS)
        .collect()
}

/// Deterministic near-duplicate check used alongside the model's judgement.
pub fn is_near_duplicate(a: &NewsletterItem, b: &NewsletterItem) -> bool {
    let (ta, tb) = (title_tokens(&a.title), title_tokens(&b.title));
    if ta.len() >= MIN_TITLE_TOKENS && tb.len() >= MIN_TITLE_TOKENS {
        let shared = ta.intersection(&tb).count() as f64;
        let union = ta.union(&tb).count() as f64;
        if shared / union >= TITLE_SIMILARITY {
            return true;
        }
    }

    let (fa, fb) = (fingerprint(&a.content), fingerprint(&b.content));
    fa.chars().count() >= MIN_FINGERPRINT_CHARS && fa == fb
}

fn build_groups(items: Vec<NewsletterItem>, outcome: BatchOutcome) -> Vec<TopicGroup> {
    let n = items.len();
    let mut sets = DisjointSet::new(n);

    for group in &outcome.duplicates {
        for pair in group.windows(2) {
            sets.union(pair[0], pair[1]);
        }
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if is_near_duplicate(&items[i], &items[j]) {
                sets.union(i, j);
            }
        }
    }

    let mut slots: Vec<Option<NewsletterItem>> = items.into_iter().map(Some).collect();
    let mut merged_count = 0;
    for idx in 0..n {
        let root = sets.find(idx);
        if root == idx {
            continue;
        }
        let Some(duplicate) = slots[idx].take() else {
            continue;
        };
        if let Some(primary) = slots[root].as_mut() {
            let known: HashSet<String> = primary.sources().map(str::to_string).collect();
            let extra: Vec<String> = duplicate
                .sources()
                .filter(|s| !known.contains(*s))
                .map(str::to_string)
                .collect();
            for source in extra {
                if !primary.merged_sources.contains(&source) {
                    primary.merged_sources.push(source);
                }
            }
            merged_count += 1;
        }
    }
    if merged_count > 0 {
        info!(merged = merged_count, "merged near-duplicate items");
    }

    outcome
        .assignments
        .into_iter()
        .filter_map(|assignment| {
            let members: Vec<NewsletterItem> = assignment
                .members
                .iter()
                .filter_map(|&idx| slots.get_mut(idx).and_then(Option::take))
                .collect();
            (!members.is_empty()).then(|| TopicGroup {
                topic_label: assignment.label,
                description: assignment.description,
                members,
                key_points: Vec::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;
    use crate::test_support::{item, ScriptedLlm};

    fn llm_config(batch_token_budget: usize) -> LlmConfig {
        LlmConfig {
            provider: LlmProvider::Anthropic,
            model: "m".to_string(),
            api_key_env: "K".to_string(),
            max_tokens: 1024,
            base_url: None,
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_concurrency: 2,
            batch_token_budget,
        }
    }

    fn sample_items() -> Vec<NewsletterItem> {
        vec![
            item("Feed A", "New Rust release ships", "Rust 1.80 adds lazy statics to std.", 10),
            item("Feed B", "Postgres 17 beta", "Postgres gets incremental backup.", 11),
            item("Feed C", "Rust compiler speedups", "The compiler got faster this cycle.", 12),
            item("Feed D", "Office coffee machine", "Unrelated musings about coffee.", 13),
        ]
    }

    #[tokio::test]
    async fn test_groups_follow_model_assignment() {
        let llm = ScriptedLlm::new(|_| {
            Ok(r#"Sure! {"topics": [
                {"title": "Rust", "description": "Rust news", "article_indices": [0, 2]},
                {"title": "Databases", "article_indices": [1]}
            ]}"#
                .to_string())
        });
        let clusterer = TopicClusterer::new(llm.clone(), &llm_config(8000));

        let groups = clusterer.group_by_topic(sample_items()).await;

        assert_eq!(llm.calls(), 1);
        let labels: Vec<&str> = groups.iter().map(|g| g.topic_label.as_str()).collect();
        assert_eq!(labels, vec!["Rust", "Databases", UNCATEGORIZED]);
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[0].description, "Rust news");
        assert_eq!(groups[2].members[0].title, "Office coffee machine");
    }

    #[tokio::test]
    async fn test_first_assignment_wins_and_bad_indices_are_ignored() {
        let llm = ScriptedLlm::new(|_| {
            Ok(r#"{"topics": [
                {"title": "A", "article_indices": [0, 1, 99]},
                {"title": "B", "article_indices": [1, 2, 3]}
            ]}"#
                .to_string())
        });
        let clusterer = TopicClusterer::new(llm, &llm_config(8000));

        let groups = clusterer.group_by_topic(sample_items()).await;
        let total: usize = groups.iter().map(|g| g.members.len()).sum();
        assert_eq!(total, 4);
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[1].members.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_one_group_per_item() {
        let llm = ScriptedLlm::failing();
        let clusterer = TopicClusterer::new(llm.clone(), &llm_config(8000));

        let groups = clusterer.group_by_topic(sample_items()).await;
        assert_eq!(groups.len(), 4);
        assert!(groups.iter().all(|g| g.members.len() == 1));
        assert_eq!(groups[1].topic_label, "Postgres 17 beta");
    }

    #[tokio::test]
    async fn test_unparsable_response_falls_back() {
        let llm = ScriptedLlm::new(|_| Ok("I could not decide.".to_string()));
        let clusterer = TopicClusterer::new(llm, &llm_config(8000));
        let groups = clusterer.group_by_topic(sample_items()).await;
        assert_eq!(groups.len(), 4);
    }

    #[tokio::test]
    async fn test_single_item_skips_the_model() {
        let llm = ScriptedLlm::failing();
        let clusterer = TopicClusterer::new(llm.clone(), &llm_config(8000));
        let groups = clusterer
            .group_by_topic(vec![item("Feed A", "Only one", "Body", 10)])
            .await;
        assert_eq!(llm.calls(), 0);
        assert_eq!(groups.len(), 1);
    }

    #[tokio::test]
    async fn test_batches_merge_topics_by_label() {
        let llm = ScriptedLlm::new(|_| {
            Ok(r#"{"topics": [{"title": "rust", "article_indices": [0, 1]}]}"#.to_string())
        });
        // room for two items per request
        let clusterer = TopicClusterer::new(llm.clone(), &llm_config(PROMPT_OVERHEAD_TOKENS + 80));
        let items = vec![
            item("A", "First story here", &"alpha ".repeat(20), 10),
            item("B", "Second story here", &"beta ".repeat(20), 10),
            item("C", "Third story here", &"gamma ".repeat(20), 10),
            item("D", "Fourth story here", &"delta ".repeat(20), 10),
        ];

        let groups = clusterer.group_by_topic(items).await;

        assert_eq!(llm.calls(), 2);
        let rust: Vec<&TopicGroup> = groups.iter().filter(|g| g.topic_label == "rust").collect();
        assert_eq!(rust.len(), 1);
        let total: usize = groups.iter().map(|g| g.members.len()).sum();
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn test_model_duplicates_are_merged_keeping_sources() {
        let llm = ScriptedLlm::new(|_| {
            Ok(r#"{"topics": [
                {"title": "Rust", "article_indices": [0, 2]},
                {"title": "Other", "article_indices": [1, 3]}
            ], "duplicates": [[0, 2]]}"#
                .to_string())
        });
        let clusterer = TopicClusterer::new(llm, &llm_config(8000));

        let groups = clusterer.group_by_topic(sample_items()).await;

        assert_eq!(groups[0].members.len(), 1);
        let primary = &groups[0].members[0];
        assert_eq!(primary.title, "New Rust release ships");
        let sources: Vec<&str> = primary.sources().collect();
        assert_eq!(sources, vec!["Feed A", "Feed C"]);
    }

    #[tokio::test]
    async fn test_similar_titles_are_merged_without_model_help() {
        let llm = ScriptedLlm::new(|_| {
            Ok(r#"{"topics": [{"title": "AI", "article_indices": [0]}, {"title": "Policy", "article_indices": [1]}]}"#
                .to_string())
        });
        let clusterer = TopicClusterer::new(llm, &llm_config(8000));
        let items = vec![
            item("Newsletter One", "EU passes sweeping AI act", "Coverage from one outlet.", 10),
            item("Newsletter Two", "EU passes sweeping AI act!", "Coverage from another outlet.", 11),
        ];

        let groups = clusterer.group_by_topic(items).await;

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members[0].merged_sources, vec!["Newsletter Two"]);
    }

    #[test]
    fn test_near_duplicate_detection() {
        let body = "The same syndicated story body text that appears in two different newsletters this week, word for word. It covers the database release in great detail.";
        let a = item("One", "Short", body, 10);
        let b = item("Two", "Different", body, 10);
        assert!(is_near_duplicate(&a, &b));

        let c = item("Three", "Weekly digest", "Some text", 10);
        let d = item("Four", "Weekly digest", "Other text", 10);
        // two-word titles are too generic to match on
        assert!(!is_near_duplicate(&c, &d));
    }
}
