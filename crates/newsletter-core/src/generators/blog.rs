use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{default_title, digest, padding_pool, strip_code_fences, take_words, MAX_EXPANSIONS};
use crate::config::{BlogConfig, BlogFormat};
use crate::llm::LlmClient;
use crate::models::{count_words, BlogPost, SynthesizedContent};

const SOURCES_HEADING: &str = "Sources";
const TAKEAWAYS_HEADING: &str = "Key Takeaways";
const IN_DEPTH_HEADING: &str = "In Depth";
/// The sources list may use at most `1 / SOURCES_SHARE` of the word budget.
const SOURCES_SHARE: usize = 5;
/// Padding bullets shorter than this are not worth adding.
const MIN_PAD_WORDS: usize = 3;

const SYSTEM_PROMPT: &str = "You are a technology blogger who turns newsletter roundups into clear, engaging Markdown posts.";

/// Inclusive word-count bounds for a target: `[0.8W, 1.2W]`.
pub fn word_bounds(target: usize) -> (usize, usize) {
    ((target * 4).div_ceil(5), target * 6 / 5)
}

pub struct BlogGenerator {
    llm: Arc<dyn LlmClient>,
    config: BlogConfig,
}

impl BlogGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, config: BlogConfig) -> Self {
        Self { llm, config }
    }

    pub async fn generate(&self, content: &SynthesizedContent) -> BlogPost {
        let prompt = self.build_prompt(content);

        let markdown = match self.llm.complete(&prompt, Some(SYSTEM_PROMPT)).await {
            Ok(text) => {
                let first = strip_code_fences(&text);
                if is_well_structured(&first) {
                    first
                } else {
                    debug!("blog response lacks title or sections, re-prompting");
                    let strict = format!("{}\n\n{}", prompt, STRICT_FORMAT_RULES);
                    match self.llm.complete(&strict, Some(SYSTEM_PROMPT)).await {
                        Ok(text) => strip_code_fences(&text),
                        Err(e) => {
                            warn!(error = %e, "strict blog re-prompt failed, keeping first response");
                            first
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "blog generation failed, composing from synthesized content");
                compose_fallback(content, self.config.format)
            }
        };

        let mut doc = Document::parse(&markdown, &default_title(content));
        if self.config.include_sources {
            doc.sources = content.sources().into_iter().collect();
        }

        let (lower, upper) = word_bounds(self.config.target_words);
        let pool = padding_pool(content, &doc.render(), false);
        doc.fit(lower, upper, pool);
        self.expand(&mut doc, content, lower, upper).await;

        let post = BlogPost::new(doc.title.clone(), doc.render(), content.sources(), Utc::now());
        if post.word_count() < lower || post.word_count() > upper {
            warn!(words = post.word_count(), lower, upper, "blog length outside target range");
        }
        info!(
            words = post.word_count(),
            target = self.config.target_words,
            format = %self.config.format,
            "blog post generated"
        );
        post
    }

    fn build_prompt(&self, content: &SynthesizedContent) -> String {
        let target = self.config.target_words;
        let shape = match self.config.format {
            BlogFormat::LongForm => format!(
                "Write an in-depth blog post of about {} words. Open with an introduction section, \
                 give each major topic its own section with context and analysis, and finish with a \
                 closing section that ties the themes together.",
                target
            ),
            BlogFormat::Summary => format!(
                "Write a condensed summary blog post of about {} words. Use short sections with \
                 brief paragraphs: a quick overview, the essential developments, and a one-paragraph wrap-up.",
                target
            ),
            BlogFormat::Listicle => format!(
                "Write a listicle blog post of about {} words. Start with a short introduction section, \
                 present each topic as a numbered section heading (\"## 1. ...\"), and end with a closing section.",
                target
            ),
        };

        format!(
            r###"{}

FORMAT:
1. The first line is the post title, starting with "# "
2. Sections start with "## "
3. Use ONLY the material below - no external knowledge
4. Do not add a sources section

Material:
{}"###,
            shape,
            digest(content)
        )
    }

    /// Asks for more text while the post is short of `lower` and each round
    /// still adds something.
    async fn expand(&self, doc: &mut Document, content: &SynthesizedContent, lower: usize, upper: usize) {
        for round in 1..=MAX_EXPANSIONS {
            let words = doc.words();
            if words >= lower {
                return;
            }
            let needed = self.config.target_words.saturating_sub(words).max(lower - words);
            let prompt = expansion_prompt(doc, content, needed);
            let reply = match self.llm.complete(&prompt, Some(SYSTEM_PROMPT)).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, round, "blog expansion failed");
                    return;
                }
            };
            let added = doc.absorb(&strip_code_fences(&reply));
            debug!(round, added, "expanded short blog post");
            if added == 0 {
                return;
            }
            doc.fit(lower, upper, Vec::new());
        }
    }
}

fn expansion_prompt(doc: &Document, content: &SynthesizedContent, needed: usize) -> String {
    format!(
        r###"The article below has {} words and needs about {} more. Add new paragraphs that deepen it with context, implications and concrete details from the material.

FORMAT:
1. Return only the new text, not the whole article
2. Put each addition under the "## " heading of the section it extends, or under a new "## " heading placed before the closing section
3. Use ONLY the material below - no external knowledge

Article:
{}

Material:
{}"###,
        doc.words(),
        needed,
        doc.render(),
        digest(content)
    )
}

const STRICT_FORMAT_RULES: &str = r###"IMPORTANT: Your previous answer did not follow the required structure.
Respond with Markdown only, no code fences and no commentary.
- Line 1 MUST be the title, in the form "# Title"
- Include AT LEAST two sections whose headings start with "## "
- The first section is the opening and the last section is the closing"###;

/// A `# ` title line plus at least two `## ` sections.
fn is_well_structured(markdown: &str) -> bool {
    let has_title = markdown
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.starts_with("# "))
        .unwrap_or(false);
    let sections = markdown.lines().filter(|l| l.starts_with("## ")).count();
    has_title && sections >= 2
}

fn compose_fallback(content: &SynthesizedContent, format: BlogFormat) -> String {
    let mut md = format!("# {}\n\n", default_title(content));

    md.push_str("## Overview\n\n");
    if content.overall_summary.is_empty() {
        md.push_str(&format!(
            "This roundup gathers {} topics from {} newsletter sources.\n\n",
            content.topics.len(),
            content.source_count
        ));
    } else {
        md.push_str(&content.overall_summary);
        md.push_str("\n\n");
    }

    for (i, topic) in content.topics.iter().enumerate() {
        match format {
            BlogFormat::Listicle => md.push_str(&format!("## {}. {}\n\n", i + 1, topic.topic_label)),
            _ => md.push_str(&format!("## {}\n\n", topic.topic_label)),
        }
        if !topic.description.is_empty() {
            md.push_str(&topic.description);
            md.push_str("\n\n");
        }
        if !topic.key_points.is_empty() {
            for point in &topic.key_points {
                md.push_str(&format!("- {}\n", point));
            }
            md.push('\n');
        }
        if format == BlogFormat::LongForm {
            for item in &topic.members {
                md.push_str(&format!("**{}** ({})\n\n", item.title, item.source_name));
            }
        }
    }

    md.push_str("## Wrapping Up\n\n");
    if content.trending_themes.is_empty() {
        md.push_str("That's the roundup for this period.\n");
    } else {
        md.push_str(&format!(
            "The themes to watch: {}.\n",
            content.trending_themes.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    md
}

#[derive(Debug, Clone, PartialEq)]
struct Section {
    heading: String,
    blocks: Vec<String>,
}

impl Section {
    fn words(&self) -> usize {
        count_words(&self.heading) + self.blocks.iter().map(|b| count_words(b)).sum::<usize>()
    }
}

/// Markdown post split into title, preamble and `## ` sections, with the
/// sources list kept apart so it is always rendered last.
#[derive(Debug, Clone, PartialEq)]
struct Document {
    title: String,
    preamble: Vec<String>,
    sections: Vec<Section>,
    sources: Vec<String>,
    /// Sources folded into a trailing "and N more" line.
    more_sources: usize,
}

fn more_sources_line(n: usize) -> String {
    format!("- and {} more", n)
}

impl Document {
    fn parse(markdown: &str, fallback_title: &str) -> Self {
        let lines: Vec<&str> = markdown.lines().collect();
        // anything before the title line is chatter
        let (title, body) = match lines.iter().position(|l| l.starts_with("# ")) {
            Some(pos) => (lines[pos][2..].trim(), &lines[pos + 1..]),
            None => ("", &lines[..]),
        };

        let mut doc = Document {
            title: if title.is_empty() { fallback_title.to_string() } else { title.to_string() },
            preamble: Vec::new(),
            sections: Vec::new(),
            sources: Vec::new(),
            more_sources: 0,
        };

        let mut block = String::new();
        let mut current: Option<Section> = None;
        let flush = |block: &mut String, current: &mut Option<Section>, preamble: &mut Vec<String>| {
            let text = block.trim_end().to_string();
            block.clear();
            if text.trim().is_empty() {
                return;
            }
            match current {
                Some(section) => section.blocks.push(text),
                None => preamble.push(text),
            }
        };

        for line in body.iter().copied() {
            if let Some(heading) = line.strip_prefix("## ") {
                flush(&mut block, &mut current, &mut doc.preamble);
                if let Some(done) = current.take() {
                    doc.sections.push(done);
                }
                current = Some(Section {
                    heading: heading.trim().to_string(),
                    blocks: Vec::new(),
                });
            } else if line.trim().is_empty() {
                flush(&mut block, &mut current, &mut doc.preamble);
            } else {
                if !block.is_empty() {
                    block.push('\n');
                }
                block.push_str(line.trim_end());
            }
        }
        flush(&mut block, &mut current, &mut doc.preamble);
        if let Some(done) = current {
            doc.sections.push(done);
        }

        doc.sections
            .retain(|s| !s.heading.eq_ignore_ascii_case(SOURCES_HEADING));
        doc
    }

    fn render(&self) -> String {
        let mut parts = vec![format!("# {}", self.title)];
        parts.extend(self.preamble.iter().cloned());
        for section in &self.sections {
            parts.push(format!("## {}", section.heading));
            parts.extend(section.blocks.iter().cloned());
        }
        if !self.sources.is_empty() {
            parts.push(format!("## {}", SOURCES_HEADING));
            let mut lines: Vec<String> = self.sources.iter().map(|s| format!("- {}", s)).collect();
            if self.more_sources > 0 {
                lines.push(more_sources_line(self.more_sources));
            }
            parts.push(lines.join("\n"));
        }
        let mut out = parts.join("\n\n");
        out.push('\n');
        out
    }

    fn words(&self) -> usize {
        count_words(&self.render())
    }

    fn sources_words(&self) -> usize {
        if self.sources.is_empty() {
            return 0;
        }
        let more = if self.more_sources > 0 {
            count_words(&more_sources_line(self.more_sources))
        } else {
            0
        };
        count_words(SOURCES_HEADING) + self.sources.iter().map(|s| count_words(s)).sum::<usize>() + more
    }

    /// Keeps as many leading sources as fit in `budget` words and folds the
    /// rest into an "and N more" line. Drops the section when even one
    /// source does not fit.
    fn cap_sources(&mut self, budget: usize) {
        if self.sources_words() <= budget {
            return;
        }
        let total = self.sources.len() + self.more_sources;
        let mut used = count_words(SOURCES_HEADING);
        let mut kept = 0;
        for source in &self.sources {
            let hidden = total - kept - 1;
            let tail = if hidden > 0 { count_words(&more_sources_line(hidden)) } else { 0 };
            if used + count_words(source) + tail > budget {
                break;
            }
            used += count_words(source);
            kept += 1;
        }
        if kept == 0 {
            self.sources.clear();
            self.more_sources = 0;
        } else {
            self.sources.truncate(kept);
            self.more_sources = total - kept;
        }
    }

    /// Trims middle sections when long and adds a takeaways section when
    /// short. The upper bound always holds; the lower bound only as far as
    /// `pool` provides material.
    fn fit(&mut self, lower: usize, upper: usize, pool: Vec<String>) {
        let before = self.words();
        self.cap_sources(upper / SOURCES_SHARE);
        if self.words() > upper {
            self.trim_middle(lower, upper);
            self.truncate_longest(upper);
            self.shrink_skeleton(upper);
        }
        if self.words() < lower {
            self.pad(lower, upper, pool);
        }
        let after = self.words();
        if after != before {
            debug!(before, after, lower, upper, "fitted blog length");
        }
    }

    /// Last resort for tiny targets once every block is down to a word:
    /// drops the sources, preamble and middle sections, then shortens the
    /// title and headings.
    fn shrink_skeleton(&mut self, upper: usize) {
        loop {
            let words = self.words();
            if words <= upper {
                return;
            }
            let excess = words - upper;
            if !self.sources.is_empty() {
                self.sources.clear();
                self.more_sources = 0;
            } else if !self.preamble.is_empty() {
                self.preamble.pop();
            } else if self.sections.len() > 2 {
                self.sections.remove(self.sections.len() - 2);
            } else if let Some(section) = self.sections.iter_mut().find(|s| s.blocks.len() > 1) {
                section.blocks.pop();
            } else if count_words(&self.title) > 1 {
                let keep = count_words(&self.title).saturating_sub(excess).max(1);
                self.title = take_words(&self.title, keep);
            } else if let Some(section) = self.sections.iter_mut().find(|s| count_words(&s.heading) > 1) {
                let keep = count_words(&section.heading).saturating_sub(excess).max(1);
                section.heading = take_words(&section.heading, keep);
            } else if self.sections.pop().is_none() {
                return;
            }
        }
    }

    /// Merges an expansion reply: blocks under a known heading join that
    /// section, new headings go before the closing section, loose paragraphs
    /// gather under "In Depth". Text already in the post is skipped. Returns
    /// the number of words added.
    fn absorb(&mut self, reply: &str) -> usize {
        let before = self.words();
        let extra = Document::parse(reply, "");
        let existing = self.render();
        let fresh = |block: &String| count_words(block) > 0 && !existing.contains(block.as_str());

        let loose: Vec<String> = extra.preamble.into_iter().filter(|b| fresh(b)).collect();
        let mut additions: Vec<Section> = extra
            .sections
            .into_iter()
            .map(|section| Section {
                blocks: section.blocks.into_iter().filter(|b| fresh(b)).collect(),
                heading: section.heading,
            })
            .collect();
        if !loose.is_empty() {
            additions.push(Section {
                heading: IN_DEPTH_HEADING.to_string(),
                blocks: loose,
            });
        }

        for addition in additions {
            if addition.blocks.is_empty() {
                continue;
            }
            match self
                .sections
                .iter_mut()
                .find(|s| s.heading.eq_ignore_ascii_case(&addition.heading))
            {
                Some(target) => target.blocks.extend(addition.blocks),
                None => {
                    let idx = self.sections.len().saturating_sub(1);
                    self.sections.insert(idx, addition);
                }
            }
        }
        self.words().saturating_sub(before)
    }

    fn trim_middle(&mut self, lower: usize, upper: usize) {
        let mut words = self.words();
        while words > upper && self.sections.len() > 2 {
            let idx = self.sections.len() - 2;
            let Some(block) = self.sections[idx].blocks.pop() else {
                words -= count_words(&self.sections[idx].heading);
                self.sections.remove(idx);
                continue;
            };
            let block_words = count_words(&block);
            if words - block_words >= lower {
                words -= block_words;
                if self.sections[idx].blocks.is_empty() {
                    words -= count_words(&self.sections[idx].heading);
                    self.sections.remove(idx);
                }
            } else {
                // removing the whole block would undershoot
                let keep = block_words.saturating_sub(words - upper);
                self.sections[idx].blocks.push(take_words(&block, keep));
                return;
            }
        }
    }

    /// Shortens the largest blocks until the body fits under `upper`.
    fn truncate_longest(&mut self, upper: usize) {
        loop {
            let words = self.words();
            if words <= upper {
                return;
            }
            let excess = words - upper;
            let largest = self
                .preamble
                .iter_mut()
                .chain(self.sections.iter_mut().flat_map(|s| s.blocks.iter_mut()))
                .max_by_key(|b| count_words(b));
            let Some(block) = largest else {
                return;
            };
            let block_words = count_words(block);
            if block_words <= 1 {
                return;
            }
            let keep = block_words.saturating_sub(excess).max(1);
            *block = take_words(block, keep);
        }
    }

    fn pad(&mut self, lower: usize, upper: usize, pool: Vec<String>) {
        let mut words = self.words();
        let idx = match self
            .sections
            .iter()
            .position(|s| s.heading.eq_ignore_ascii_case(TAKEAWAYS_HEADING))
        {
            Some(idx) => idx,
            None => {
                let heading_words = count_words(TAKEAWAYS_HEADING);
                if words + heading_words + MIN_PAD_WORDS > upper || pool.is_empty() {
                    return;
                }
                // before the closing section when there is one
                let idx = self.sections.len().saturating_sub(1);
                self.sections.insert(
                    idx,
                    Section {
                        heading: TAKEAWAYS_HEADING.to_string(),
                        blocks: Vec::new(),
                    },
                );
                words += heading_words;
                idx
            }
        };

        let mut bullets: Vec<String> = Vec::new();
        for material in pool {
            if words >= lower {
                break;
            }
            let room = upper - words;
            let material_words = count_words(&material);
            let bullet = if material_words <= room {
                material
            } else if room >= MIN_PAD_WORDS {
                take_words(&material, room)
            } else {
                break;
            };
            words += count_words(&bullet);
            bullets.push(format!("- {}", bullet));
        }

        if bullets.is_empty() {
            if self.sections[idx].blocks.is_empty() {
                self.sections.remove(idx);
            }
            return;
        }
        self.sections[idx].blocks.push(bullets.join("\n"));
        debug!(added = self.sections[idx].words(), "padded blog with key takeaways");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::models::{DateRange, TopicGroup};
    use crate::test_support::{filler, item, ts, ScriptedLlm};

    fn content() -> SynthesizedContent {
        let body = (1..=40)
            .map(|i| format!("Release note number {} changes how teams ship code.", i))
            .collect::<Vec<_>>()
            .join(" ");
        SynthesizedContent {
            topics: vec![
                TopicGroup {
                    topic_label: "Rust".to_string(),
                    description: "Language and tooling news.".to_string(),
                    members: vec![item("Feed A", "Rust 1.80", &body, 10)],
                    key_points: vec!["LazyLock is stable".to_string(), "Cargo got faster".to_string()],
                },
                TopicGroup {
                    topic_label: "Databases".to_string(),
                    description: "Storage engines.".to_string(),
                    members: vec![item("Feed B", "Postgres 17", "Incremental backups arrive in Postgres.", 12)],
                    key_points: vec!["Incremental backups".to_string()],
                },
            ],
            overall_summary: "A busy week for systems programmers.".to_string(),
            trending_themes: ["Rust".to_string()].into_iter().collect(),
            source_count: 2,
            date_range: Some(DateRange {
                start: ts(10),
                end: ts(12),
            }),
        }
    }

    fn config(format: BlogFormat, target_words: usize) -> BlogConfig {
        BlogConfig {
            format,
            target_words,
            include_sources: true,
        }
    }

    fn post_with(sections: &[(&str, usize)]) -> String {
        let mut md = String::from("# Weekly Systems Roundup\n\n");
        for (heading, words) in sections {
            md.push_str(&format!("## {}\n\n{}\n\n", heading, filler(*words, "Systems news keeps moving fast.")));
        }
        md
    }

    #[test]
    fn test_word_bounds() {
        assert_eq!(word_bounds(500), (400, 600));
        assert_eq!(word_bounds(7), (6, 8));
    }

    #[test]
    fn test_structure_check() {
        assert!(is_well_structured("# T\n\n## A\n\ntext\n\n## B\n\ntext"));
        assert!(!is_well_structured("# T\n\n## Only one\n\ntext"));
        assert!(!is_well_structured("Intro\n# T\n## A\n## B"));
    }

    #[tokio::test]
    async fn test_long_response_is_trimmed_into_range() {
        let response = post_with(&[("Intro", 100), ("Rust", 300), ("Databases", 300), ("Closing", 100)]);
        let llm = ScriptedLlm::new(move |_| Ok(response.clone()));
        let generator = BlogGenerator::new(llm.clone(), config(BlogFormat::LongForm, 400));

        let post = generator.generate(&content()).await;

        let (lower, upper) = word_bounds(400);
        assert!(post.word_count() >= lower && post.word_count() <= upper, "{}", post.word_count());
        assert_eq!(post.word_count(), count_words(post.markdown_body()));
        assert!(post.markdown_body().contains("## Intro"));
        assert!(post.markdown_body().contains("## Closing"));
        assert!(post.markdown_body().trim_end().ends_with("- Feed B"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_short_response_is_padded_with_takeaways() {
        let response = post_with(&[("Intro", 30), ("Closing", 30)]);
        let llm = ScriptedLlm::new(move |_| Ok(response.clone()));
        let generator = BlogGenerator::new(llm, config(BlogFormat::Summary, 200));

        let post = generator.generate(&content()).await;

        let (lower, upper) = word_bounds(200);
        assert!(post.word_count() >= lower && post.word_count() <= upper, "{}", post.word_count());
        let body = post.markdown_body();
        let takeaways = body.find("## Key Takeaways").unwrap();
        assert!(takeaways < body.find("## Closing").unwrap());
        assert!(body.contains("- LazyLock is stable"));
    }

    #[tokio::test]
    async fn test_unstructured_response_gets_one_strict_retry() {
        let llm = ScriptedLlm::new(|prompt| {
            if prompt.contains("did not follow the required structure") {
                Ok(post_with(&[("Opening", 60), ("Closing", 60)]))
            } else {
                Ok("Here is a post without any headings at all.".to_string())
            }
        });
        let generator = BlogGenerator::new(llm.clone(), config(BlogFormat::LongForm, 150));

        let post = generator.generate(&content()).await;

        assert_eq!(llm.calls(), 2);
        assert_eq!(post.title, "Weekly Systems Roundup");
    }

    #[tokio::test]
    async fn test_second_unstructured_response_is_accepted() {
        let llm = ScriptedLlm::new(|_| Ok(filler(120, "No structure here at all.")));
        let generator = BlogGenerator::new(llm.clone(), config(BlogFormat::Listicle, 120));

        let post = generator.generate(&content()).await;

        assert_eq!(llm.calls(), 2);
        assert_eq!(post.title, "Newsletter Roundup: January 10 - January 12, 2024");
        assert!(post.markdown_body().starts_with("# Newsletter Roundup"));
        assert!(post.markdown_body().contains("No structure here"));
    }

    #[tokio::test]
    async fn test_llm_failure_composes_fallback_post() {
        let llm = ScriptedLlm::new(|_| Err(LlmError::Permanent("down".into())));
        let generator = BlogGenerator::new(llm, config(BlogFormat::Listicle, 120));

        let post = generator.generate(&content()).await;

        let body = post.markdown_body();
        assert!(body.contains("## 1. Rust"));
        assert!(body.contains("## Wrapping Up"));
        assert!(body.contains("## Sources"));
        let (lower, upper) = word_bounds(120);
        assert!(post.word_count() >= lower && post.word_count() <= upper, "{}", post.word_count());
    }

    #[tokio::test]
    async fn test_sources_section_replaced_or_omitted() {
        let response = format!("{}## Sources\n\n- Made Up Source\n", post_with(&[("Intro", 40), ("Closing", 40)]));
        let llm = ScriptedLlm::new(move |_| Ok(response.clone()));

        let mut cfg = config(BlogFormat::Summary, 90);
        cfg.include_sources = false;
        let post = BlogGenerator::new(llm, cfg).generate(&content()).await;

        assert!(!post.markdown_body().contains("Made Up Source"));
        assert!(!post.markdown_body().contains("## Sources"));
        assert!(post.sources.contains("Feed A"));
    }

    fn thin_content() -> SynthesizedContent {
        SynthesizedContent {
            topics: vec![TopicGroup {
                topic_label: "Databases".to_string(),
                description: "Storage engines.".to_string(),
                members: vec![item("Feed B", "Postgres 17", "Incremental backups arrive in Postgres.", 12)],
                key_points: vec!["Incremental backups".to_string()],
            }],
            overall_summary: "A quiet week.".to_string(),
            trending_themes: Default::default(),
            source_count: 1,
            date_range: None,
        }
    }

    #[tokio::test]
    async fn test_tiny_target_folds_long_source_list() {
        let mut content = content();
        content.topics[1].members = (1..=20)
            .map(|i| item(&format!("Source {}", i), "Postgres 17", "Incremental backups arrive in Postgres.", 12))
            .collect();
        let response = post_with(&[("Intro", 60), ("Middle", 60), ("Closing", 60)]);
        let llm = ScriptedLlm::new(move |_| Ok(response.clone()));
        let generator = BlogGenerator::new(llm.clone(), config(BlogFormat::Summary, 30));

        let post = generator.generate(&content).await;

        let (lower, upper) = word_bounds(30);
        assert!(post.word_count() >= lower && post.word_count() <= upper, "{}", post.word_count());
        assert!(post.markdown_body().contains("- and 20 more"));
        assert_eq!(post.sources.len(), 21);
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn test_fit_shrinks_skeleton_for_tiny_budgets() {
        let mut doc = Document::parse(&post_with(&[("Intro", 40), ("Closing", 40)]), "Fallback");
        doc.sources = vec!["Feed A".to_string(), "Feed B".to_string()];

        doc.fit(4, 6, Vec::new());

        let words = doc.words();
        assert!((4..=6).contains(&words), "{}", words);
        assert!(doc.sources.is_empty());
    }

    #[tokio::test]
    async fn test_thin_content_is_expanded_by_the_model() {
        let rounds = std::sync::atomic::AtomicUsize::new(0);
        let llm = ScriptedLlm::new(move |prompt| {
            if !prompt.contains("needs about") {
                return Ok(post_with(&[("Intro", 40), ("Closing", 40)]));
            }
            let n = rounds.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            Ok(format!(
                "## Deep Dive {}\n\n{}\n\n{}",
                n,
                filler(300, &format!("Round {} shows why incremental backups matter to operators.", n)),
                filler(300, &format!("Round {} also explains restore drills for large clusters.", n)),
            ))
        });
        let generator = BlogGenerator::new(llm.clone(), config(BlogFormat::LongForm, 1500));

        let post = generator.generate(&thin_content()).await;

        let (lower, upper) = word_bounds(1500);
        assert!(post.word_count() >= lower && post.word_count() <= upper, "{}", post.word_count());
        assert_eq!(llm.calls(), 3);
        let body = post.markdown_body();
        assert!(body.find("## Deep Dive 2").unwrap() < body.find("## Closing").unwrap());
    }

    #[tokio::test]
    async fn test_expansion_stops_when_nothing_new_comes_back() {
        let llm = ScriptedLlm::new(|_| Ok(post_with(&[("Intro", 40), ("Closing", 40)])));
        let generator = BlogGenerator::new(llm.clone(), config(BlogFormat::LongForm, 1500));

        let post = generator.generate(&thin_content()).await;

        assert_eq!(llm.calls(), 2);
        assert!(post.word_count() <= word_bounds(1500).1);
    }

    #[test]
    fn test_parse_drops_chatter_before_title() {
        let doc = Document::parse("Sure, here it is:\n\n# Title\n\nIntro\n\n## A\n\none\n\ntwo", "Fallback");
        assert_eq!(doc.title, "Title");
        assert_eq!(doc.preamble, vec!["Intro"]);
        assert_eq!(doc.sections[0].blocks, vec!["one", "two"]);
    }
}
