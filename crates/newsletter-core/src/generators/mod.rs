//! Artifact generators. Both are pure functions of the synthesized content
//! and their config, plus LLM calls.

mod blog;
mod script;

use std::collections::HashSet;

use crate::models::SynthesizedContent;

pub use crate::models::count_words;
pub use blog::{word_bounds, BlogGenerator};
pub use script::{spoken_word_bounds, ScriptGenerator};

const MIN_SENTENCE_WORDS: usize = 4;
/// Extra LLM rounds a generator may spend lengthening a short artifact
/// once the synthesized material is used up.
pub(crate) const MAX_EXPANSIONS: usize = 2;

/// Plain-text outline of the synthesized content used as prompt context.
pub(crate) fn digest(content: &SynthesizedContent) -> String {
    let mut out = String::new();

    if !content.overall_summary.is_empty() {
        out.push_str("OVERVIEW:\n");
        out.push_str(&content.overall_summary);
        out.push_str("\n\n");
    }
    if !content.trending_themes.is_empty() {
        out.push_str("TRENDING THEMES: ");
        out.push_str(&content.trending_themes.iter().cloned().collect::<Vec<_>>().join(", "));
        out.push_str("\n\n");
    }

    for (i, topic) in content.topics.iter().enumerate() {
        out.push_str(&format!("TOPIC {}: {}\n", i + 1, topic.topic_label));
        if !topic.description.is_empty() {
            out.push_str(&format!("{}\n", topic.description));
        }
        for point in &topic.key_points {
            out.push_str(&format!("- {}\n", point));
        }
        let sources: Vec<&str> = topic.members.iter().flat_map(|m| m.sources()).collect();
        out.push_str(&format!("Sources: {}\n\n", sources.join(", ")));
    }

    out
}

/// Default title from the covered date range.
pub(crate) fn default_title(content: &SynthesizedContent) -> String {
    match &content.date_range {
        Some(range) if range.start.date_naive() == range.end.date_naive() => {
            format!("Newsletter Roundup: {}", range.start.format("%B %-d, %Y"))
        }
        Some(range) => format!(
            "Newsletter Roundup: {} - {}",
            range.start.format("%B %-d"),
            range.end.format("%B %-d, %Y")
        ),
        None => "Newsletter Roundup".to_string(),
    }
}

/// Removes a surrounding Markdown code fence.
pub(crate) fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
    if lines.last().map(|l| l.trim_start().starts_with("```")).unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// First `n` words of `text`, counted the same way as [`count_words`].
pub(crate) fn take_words(text: &str, n: usize) -> String {
    let mut kept = Vec::new();
    let mut words = 0;
    for token in text.split_whitespace() {
        if words == n {
            break;
        }
        if token.chars().any(char::is_alphanumeric) {
            words += 1;
        }
        kept.push(token);
    }
    kept.join(" ")
}

/// Sentences with at least a few words, whitespace-collapsed.
pub(crate) fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for token in text.split_whitespace() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(token);
        if token.ends_with(['.', '!', '?']) {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }

    out.retain(|s| count_words(s) >= MIN_SENTENCE_WORDS);
    out
}

/// Material for lengthening an artifact, most relevant first: key points,
/// topic descriptions, item titles, then content sentences. Entries already
/// present in `existing` are skipped.
pub(crate) fn padding_pool(content: &SynthesizedContent, existing: &str, with_titles: bool) -> Vec<String> {
    let existing = existing.to_lowercase();
    let mut seen: HashSet<String> = HashSet::new();
    let mut pool = Vec::new();

    let mut offer = |candidate: &str| {
        let candidate = candidate.trim();
        let key = candidate.to_lowercase();
        if count_words(candidate) == 0 || existing.contains(&key) || !seen.insert(key) {
            return;
        }
        pool.push(candidate.to_string());
    };

    for point in content.key_points() {
        offer(point);
    }
    for topic in &content.topics {
        offer(&topic.description);
    }
    if with_titles {
        for item in content.topics.iter().flat_map(|t| t.members.iter()) {
            offer(&item.title);
        }
    }
    for item in content.topics.iter().flat_map(|t| t.members.iter()) {
        for sentence in sentences(&item.content) {
            offer(&sentence);
        }
    }

    pool
}
