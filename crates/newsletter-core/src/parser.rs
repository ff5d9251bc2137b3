use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use html2text::render::text_renderer::TrivialDecorator;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use tracing::{debug, warn};

use crate::error::ContentError;
use crate::models::{NewsletterItem, SourceType};
use crate::sources::{RawRecord, RecordBody};

/// Cleaned content shorter than this is not worth summarizing.
pub const MIN_CONTENT_CHARS: usize = 40;

const RENDER_WIDTH: usize = 1000;
const MIN_ITEMS_FOR_REPEAT_SCAN: usize = 3;

/// Subtrees that never carry article text.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "noscript", "iframe", "head", "form", "svg",
    "button", "img", "hr",
];

const VOID_TAGS: &[&str] = &["br", "meta", "link", "input", "source", "wbr", "col", "area"];

fn boilerplate_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?im)\bunsubscribe\b[^\n]*$",
            r"(?im)manage\s+(?:your\s+)?subscription[^\n]*$",
            r"(?im)update\s+your\s+(?:email\s+)?preferences[^\n]*$",
            r"(?im)view\s+(?:this\s+)?(?:email\s+)?(?:in\s+(?:your\s+)?browser|online)[^\n]*$",
            r"(?im)read\s+(?:it\s+)?online[^\n]*$",
            r"(?im)having\s+trouble\s+viewing[^\n]*$",
            r"(?im)(?:copyright\s*)?©\s*\d{4}[^\n]*$",
            r"(?im)copyright\s+\d{4}[^\n]*$",
            r"(?i)all\s+rights\s+reserved\.?",
            r"(?i)(?:follow|connect\s+with|like)\s+us\s+on\s+(?:twitter|x|facebook|instagram|linkedin|threads|bluesky|mastodon)",
            r"(?i)join\s+us\s+on\s+social\s+media",
            r"(?im)this\s+email\s+was\s+sent\s+to[^\n]*$",
            r"(?im)you\s+are\s+receiving\s+this\s+(?:email|newsletter)[^\n]*$",
            r"(?im)forward\s+this\s+(?:email|newsletter)[^\n]*$",
            r"(?im)share\s+(?:this\s+)?with\s+a\s+friend[^\n]*$",
        ]
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = *p, error = %e, "skipping boilerplate pattern");
                None
            }
        })
        .collect()
    })
}

/// Turns raw fetched records into [`NewsletterItem`]s.
#[derive(Debug, Clone)]
pub struct ContentParser {
    min_chars: usize,
}

impl Default for ContentParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of normalizing every record from one source.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub items: Vec<NewsletterItem>,
    /// Title of each dropped record with the reason it was dropped.
    pub dropped: Vec<(String, ContentError)>,
}

impl ContentParser {
    pub fn new() -> Self {
        Self {
            min_chars: MIN_CONTENT_CHARS,
        }
    }

    pub fn with_min_chars(min_chars: usize) -> Self {
        Self { min_chars }
    }

    /// Strips presentational markup and returns readable text with paragraph
    /// breaks. Malformed markup degrades to whatever text can be recovered.
    pub fn extract_text(&self, markup: &str) -> String {
        if markup.trim().is_empty() {
            return String::new();
        }

        let document = Html::parse_document(markup);
        let mut pruned = String::with_capacity(markup.len() / 2);
        write_pruned(document.root_element(), &mut pruned);

        match html2text::config::with_decorator(TrivialDecorator::new())
            .string_from_read(pruned.as_bytes(), RENDER_WIDTH)
        {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "markup renderer failed, falling back to raw text nodes");
                document
                    .root_element()
                    .text()
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }

    /// Removes newsletter boilerplate and normalizes whitespace.
    pub fn clean(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return String::new();
        }

        let mut cleaned = text.replace("\r\n", "\n").replace('\r', "\n");
        for pattern in boilerplate_patterns() {
            cleaned = pattern.replace_all(&cleaned, "").into_owned();
        }

        collapse_whitespace(&cleaned)
    }

    /// Normalizes a single record.
    pub fn normalize(&self, record: RawRecord) -> Result<NewsletterItem, ContentError> {
        let text = self.record_text(&record.body);
        self.build_item(record, text)
    }

    /// Normalizes every record from one source, additionally removing lines
    /// that repeat across most of that source's items.
    pub fn normalize_source(&self, records: Vec<RawRecord>) -> NormalizedBatch {
        let mut texts: Vec<String> = records.iter().map(|r| self.record_text(&r.body)).collect();
        self.strip_repeated_lines(&mut texts);

        let mut batch = NormalizedBatch::default();
        for (record, text) in records.into_iter().zip(texts) {
            let title = record.title.clone().unwrap_or_default();
            match self.build_item(record, text) {
                Ok(item) => batch.items.push(item),
                Err(e) => batch.dropped.push((title, e)),
            }
        }
        batch
    }

    /// Drops lines present in more than half of the texts. A text is left
    /// untouched when stripping would push it under the minimum length.
    pub fn strip_repeated_lines(&self, texts: &mut [String]) {
        if texts.len() < MIN_ITEMS_FOR_REPEAT_SCAN {
            return;
        }

        let mut frequency: HashMap<String, usize> = HashMap::new();
        for text in texts.iter() {
            let unique: HashSet<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            for line in unique {
                *frequency.entry(line.to_string()).or_insert(0) += 1;
            }
        }

        let threshold = texts.len() / 2;
        let repeated: HashSet<&str> = frequency
            .iter()
            .filter(|(_, &count)| count > threshold)
            .map(|(line, _)| line.as_str())
            .collect();
        if repeated.is_empty() {
            return;
        }

        for text in texts.iter_mut() {
            let kept = text
                .lines()
                .filter(|l| !repeated.contains(l.trim()))
                .collect::<Vec<_>>()
                .join("\n");
            let kept = collapse_whitespace(&kept);
            if kept.chars().count() >= self.min_chars {
                *text = kept;
            }
        }
    }

    fn record_text(&self, body: &RecordBody) -> String {
        match body {
            RecordBody::Markup(markup) => self.clean(&self.extract_text(markup)),
            RecordBody::Plain(text) => self.clean(text),
        }
    }

    fn build_item(&self, record: RawRecord, content: String) -> Result<NewsletterItem, ContentError> {
        let len = content.chars().count();
        if len == 0 {
            return Err(ContentError::Empty);
        }
        if len < self.min_chars {
            return Err(ContentError::TooShort {
                len,
                min: self.min_chars,
            });
        }

        let published_at = record
            .published_at
            .or_else(|| record.date_hint.as_deref().and_then(parse_date_hint))
            .unwrap_or(record.fetched_at);

        let title = record
            .title
            .as_deref()
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| default_title(record.source_type).to_string());

        let raw_markup = match record.body {
            RecordBody::Markup(markup) => Some(markup),
            RecordBody::Plain(_) => None,
        };

        Ok(NewsletterItem {
            source_name: record.source_name,
            source_type: record.source_type,
            title,
            content,
            raw_markup,
            published_at,
            author: record.author.filter(|a| !a.trim().is_empty()),
            origin_url: record.origin_url,
            merged_sources: Vec::new(),
        })
    }
}

fn default_title(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Mail => "(No Subject)",
        SourceType::Feed => "(No Title)",
        SourceType::File => "(Untitled)",
    }
}

/// Parses the loosely formatted dates found in headers and file names.
pub fn parse_date_hint(hint: &str) -> Option<DateTime<Utc>> {
    let hint = hint.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(hint) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(hint) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(hint, fmt) {
            return Some(ndt.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%d %b %Y", "%B %d, %Y"] {
        if let Ok(nd) = NaiveDate::parse_from_str(hint, fmt) {
            return nd.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
        }
    }
    None
}

/// Collapses space runs, trims lines and keeps at most one blank line
/// between paragraphs.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = 0;
    }
    out
}

fn is_noise_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    let parts: Vec<&str> = name.split(|c: char| c == '-' || c == '_').collect();
    parts.iter().any(|p| {
        matches!(
            *p,
            "ad" | "ads" | "advert" | "advertisement" | "advertising" | "sponsor" | "sponsored"
                | "tracking" | "tracker" | "promo"
        )
    }) || name.contains("social-share")
        || name.contains("share-buttons")
}

fn is_noise_element(el: &ElementRef) -> bool {
    let value = el.value();
    if SKIPPED_TAGS.contains(&value.name()) {
        return true;
    }
    value.id().is_some_and(is_noise_name) || value.classes().any(is_noise_name)
}

/// Re-serializes the tree without noise subtrees or attributes.
fn write_pruned(el: ElementRef, out: &mut String) {
    if is_noise_element(&el) {
        return;
    }

    let name = el.value().name();
    out.push('<');
    out.push_str(name);
    out.push('>');
    if VOID_TAGS.contains(&name) {
        return;
    }

    for child in el.children() {
        match child.value() {
            Node::Text(text) => push_escaped(out, text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    write_pruned(child_el, out);
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}
