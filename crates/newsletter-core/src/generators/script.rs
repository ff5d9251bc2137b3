use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{default_title, digest, padding_pool, strip_code_fences, take_words, MAX_EXPANSIONS};
use crate::config::{ScriptStyle, VideoScriptConfig};
use crate::llm::{parse_bullets, LlmClient};
use crate::models::{count_words, ShortVideoScript, SynthesizedContent, WORDS_PER_MINUTE};

/// Allowed drift between spoken time and the target duration.
const TOLERANCE_SECONDS: u32 = 10;
const MAX_HOOK_WORDS: usize = 25;
const MAX_CTA_WORDS: usize = 20;
const DEFAULT_POINTS: usize = 3;
const MIN_PAD_WORDS: usize = 3;

const SYSTEM_PROMPT: &str = "You write punchy scripts for short vertical videos that recap newsletter news.";

/// Inclusive spoken-word bounds keeping speaking time within the tolerance
/// of `duration_seconds`.
pub fn spoken_word_bounds(duration_seconds: u32) -> (usize, usize) {
    let per_minute = WORDS_PER_MINUTE as u32;
    let low = duration_seconds.saturating_sub(TOLERANCE_SECONDS) * per_minute;
    let high = (duration_seconds + TOLERANCE_SECONDS) * per_minute;
    (low.div_ceil(60) as usize, (high / 60) as usize)
}

fn target_words(duration_seconds: u32) -> usize {
    (duration_seconds as usize * WORDS_PER_MINUTE) / 60
}

/// Sections pulled out of a labelled response.
#[derive(Debug, Default, PartialEq)]
struct ScriptParts {
    title: String,
    hook: String,
    points: Vec<String>,
    cta: String,
    cues: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Label {
    Title,
    Hook,
    Points,
    Cta,
    Cues,
}

const LABELS: &[(&str, Label)] = &[
    ("TITLE:", Label::Title),
    ("HOOK:", Label::Hook),
    ("MAIN POINTS:", Label::Points),
    ("POINTS:", Label::Points),
    ("CALL TO ACTION:", Label::Cta),
    ("CTA:", Label::Cta),
    ("VISUAL CUES:", Label::Cues),
];

pub struct ScriptGenerator {
    llm: Arc<dyn LlmClient>,
    config: VideoScriptConfig,
}

impl ScriptGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, config: VideoScriptConfig) -> Self {
        Self { llm, config }
    }

    pub async fn generate(&self, content: &SynthesizedContent) -> ShortVideoScript {
        let seconds = self.config.duration.seconds();
        let prompt = self.build_prompt(content);

        let mut parts = match self.llm.complete(&prompt, Some(SYSTEM_PROMPT)).await {
            Ok(text) => parse_labelled(&strip_code_fences(&text)),
            Err(e) => {
                warn!(error = %e, "script generation failed, composing from synthesized content");
                ScriptParts::default()
            }
        };

        self.fill_missing(&mut parts, content);
        let (lower, upper) = spoken_word_bounds(seconds);
        fit_spoken_words(&mut parts, lower, upper);
        let pool = padding_pool(content, &spoken_text(&parts), true);
        pad_points(&mut parts, pool, lower, upper);
        self.expand(&mut parts, content, lower, upper).await;

        let spoken = spoken_words(&parts);
        if spoken < lower || spoken > upper {
            warn!(words = spoken, lower, upper, "script length outside target range");
        }

        let visual_cues = if self.config.include_visual_cues {
            if parts.cues.is_empty() {
                Some(derive_cues(&parts))
            } else {
                Some(std::mem::take(&mut parts.cues))
            }
        } else {
            None
        };

        let full_script = render(&parts, visual_cues.as_deref());
        let script = ShortVideoScript {
            title: parts.title,
            hook: parts.hook,
            main_points: parts.points,
            call_to_action: parts.cta,
            visual_cues,
            target_duration_seconds: seconds,
            full_script,
            generated_at: Utc::now(),
        };
        info!(
            words = script.spoken_word_count(),
            seconds = script.estimated_seconds(),
            target = seconds,
            "video script generated"
        );
        script
    }

    fn build_prompt(&self, content: &SynthesizedContent) -> String {
        let seconds = self.config.duration.seconds();
        let tone = match self.config.style {
            ScriptStyle::Educational => "Explain clearly, like a friendly teacher. Favor the why behind each story.",
            ScriptStyle::Entertaining => "Be playful and energetic. Use humor and surprise, but stay accurate.",
            ScriptStyle::News => "Sound like a news anchor: crisp, neutral, fact-first.",
        };

        let mut format_lines = String::from(
            "TITLE: <short video title>\n\
             HOOK: <one attention-grabbing opening sentence>\n\
             POINTS:\n- <main point>\n- <main point>\n\
             CTA: <one call to action>",
        );
        if self.config.include_visual_cues {
            format_lines.push_str("\nVISUAL CUES:\n- <on-screen visual>\n- <on-screen visual>");
        }

        format!(
            r#"Write a {} second short-video script recapping the newsletter material below.

RULES:
1. The spoken parts (hook, points, call to action) total about {} words, read at {} words per minute
2. {}
3. 2-4 main points, one sentence each
4. Use ONLY the material below

Respond in exactly this format:
{}

Material:
{}"#,
            seconds,
            target_words(seconds),
            WORDS_PER_MINUTE,
            tone,
            format_lines,
            digest(content)
        )
    }

    /// Asks for extra main points while the script runs short and each
    /// round still adds one.
    async fn expand(&self, parts: &mut ScriptParts, content: &SynthesizedContent, lower: usize, upper: usize) {
        for round in 1..=MAX_EXPANSIONS {
            let words = spoken_words(parts);
            if words >= lower {
                return;
            }
            let prompt = self.expansion_prompt(parts, content, lower - words);
            let reply = match self.llm.complete(&prompt, Some(SYSTEM_PROMPT)).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, round, "script expansion failed");
                    return;
                }
            };
            let existing = spoken_text(parts).to_lowercase();
            let lines: Vec<String> = list_items(&strip_code_fences(&reply))
                .into_iter()
                .filter(|l| count_words(l) > 0 && !existing.contains(&l.to_lowercase()))
                .collect();
            let added = pad_points(parts, lines, lower, upper);
            debug!(round, added, "expanded short script");
            if added == 0 {
                return;
            }
        }
    }

    fn expansion_prompt(&self, parts: &ScriptParts, content: &SynthesizedContent, needed: usize) -> String {
        let points = parts
            .points
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            r#"This {} second video script has {} spoken words and needs about {} more.
Write additional main points that expand on the material. Each point is one spoken sentence on its own line starting with "- ". Do not repeat the current points.

Current points:
{}

Material:
{}"#,
            self.config.duration.seconds(),
            spoken_words(parts),
            needed,
            points,
            digest(content)
        )
    }

    fn fill_missing(&self, parts: &mut ScriptParts, content: &SynthesizedContent) {
        if parts.title.is_empty() {
            parts.title = default_title(content);
        }
        if parts.hook.is_empty() {
            parts.hook = match content.topics.first() {
                Some(topic) => format!("Here's what you missed in {} this week.", topic.topic_label),
                None => "Here's what you missed in the newsletters this week.".to_string(),
            };
        }
        parts.points.retain(|p| count_words(p) > 0);
        if parts.points.is_empty() {
            parts.points = content
                .topics
                .iter()
                .filter_map(|t| t.key_points.first().or_else(|| t.primary().map(|i| &i.title)))
                .take(DEFAULT_POINTS)
                .cloned()
                .collect();
        }
        if parts.points.is_empty() {
            parts.points.push(content.overall_summary.clone());
        }
        if parts.cta.is_empty() {
            parts.cta = match self.config.style {
                ScriptStyle::Educational => "Follow for a new breakdown every week.",
                ScriptStyle::Entertaining => "Follow so you never miss the good stuff!",
                ScriptStyle::News => "Follow for your weekly news roundup.",
            }
            .to_string();
        }
    }
}

fn parse_labelled(text: &str) -> ScriptParts {
    let mut parts = ScriptParts::default();
    let mut current: Option<Label> = None;
    let mut points_text = String::new();
    let mut cues_text = String::new();

    for raw in text.lines() {
        let line = raw.trim().trim_start_matches(['*', '#', ' ']);
        let found = LABELS.iter().find_map(|(prefix, label)| {
            let head = line.get(..prefix.len())?;
            head.eq_ignore_ascii_case(prefix)
                .then(|| (*label, line[prefix.len()..].trim_start_matches('*').trim()))
        });

        let (label, rest) = match found {
            Some((label, rest)) => {
                current = Some(label);
                (label, rest)
            }
            None => match current {
                Some(label) => (label, raw.trim()),
                None => continue,
            },
        };
        if rest.is_empty() {
            continue;
        }

        match label {
            Label::Title => append_sentence(&mut parts.title, rest.trim_matches('"')),
            Label::Hook => append_sentence(&mut parts.hook, rest),
            Label::Cta => append_sentence(&mut parts.cta, rest),
            Label::Points => {
                points_text.push_str(rest);
                points_text.push('\n');
            }
            Label::Cues => {
                cues_text.push_str(rest);
                cues_text.push('\n');
            }
        }
    }

    parts.points = list_items(&points_text);
    parts.cues = list_items(&cues_text);
    parts
}

fn append_sentence(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

/// Bullet lines when present, otherwise every non-empty line.
fn list_items(text: &str) -> Vec<String> {
    let bullets = parse_bullets(text);
    if !bullets.is_empty() {
        return bullets;
    }
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn spoken_text(parts: &ScriptParts) -> String {
    format!("{} {} {}", parts.hook, parts.points.join(" "), parts.cta)
}

fn spoken_words(parts: &ScriptParts) -> usize {
    count_words(&parts.hook)
        + parts.points.iter().map(|p| count_words(p)).sum::<usize>()
        + count_words(&parts.cta)
}

/// Drops or truncates trailing points when long. At least one point always
/// remains.
fn fit_spoken_words(parts: &mut ScriptParts, lower: usize, upper: usize) {
    if count_words(&parts.hook) > MAX_HOOK_WORDS {
        parts.hook = take_words(&parts.hook, MAX_HOOK_WORDS);
    }
    if count_words(&parts.cta) > MAX_CTA_WORDS {
        parts.cta = take_words(&parts.cta, MAX_CTA_WORDS);
    }

    let before = spoken_words(parts);
    let mut words = before;

    while words > upper {
        let Some(last) = parts.points.pop() else {
            break;
        };
        let last_words = count_words(&last);
        if parts.points.is_empty() || words - last_words < lower {
            let keep = last_words.saturating_sub(words - upper).max(1);
            parts.points.push(take_words(&last, keep));
            words = spoken_words(parts);
            break;
        }
        words -= last_words;
    }

    // hook and CTA alone can still overflow a 15 second script
    if words > upper {
        let excess = words - upper;
        let hook_words = count_words(&parts.hook);
        parts.hook = take_words(&parts.hook, hook_words.saturating_sub(excess).max(MIN_PAD_WORDS));
        words = spoken_words(parts);
        if words > upper {
            let cta_words = count_words(&parts.cta);
            parts.cta = take_words(&parts.cta, cta_words.saturating_sub(words - upper).max(MIN_PAD_WORDS));
            words = spoken_words(parts);
        }
    }

    if words != before {
        debug!(before, after = words, lower, upper, "trimmed script length");
    }
}

/// Appends `material` as extra points until the script reaches `lower`,
/// never passing `upper`. Returns how many points were added.
fn pad_points(parts: &mut ScriptParts, material: Vec<String>, lower: usize, upper: usize) -> usize {
    let mut words = spoken_words(parts);
    let mut added = 0;
    for material in material {
        if words >= lower {
            break;
        }
        let room = upper.saturating_sub(words);
        let material_words = count_words(&material);
        let point = if material_words <= room {
            material
        } else if room >= MIN_PAD_WORDS {
            take_words(&material, room)
        } else {
            break;
        };
        words += count_words(&point);
        parts.points.push(point);
        added += 1;
    }
    added
}

/// One cue per section: hook, each main point, call to action.
fn derive_cues(parts: &ScriptParts) -> Vec<String> {
    let mut cues = vec![format!("Open on bold on-screen text: \"{}\"", take_words(&parts.hook, 6))];
    for (i, point) in parts.points.iter().enumerate() {
        cues.push(format!("Point {} caption: \"{}\"", i + 1, take_words(point, 6)));
    }
    cues.push("End card with follow button and channel handle".to_string());
    cues
}

fn render(parts: &ScriptParts, cues: Option<&[String]>) -> String {
    let mut script = String::new();

    script.push_str("[HOOK]\n");
    script.push_str(&parts.hook);
    script.push_str("\n\n[MAIN POINTS]\n");
    for (i, point) in parts.points.iter().enumerate() {
        script.push_str(&format!("{}. {}\n", i + 1, point));
    }
    script.push_str("\n[CALL TO ACTION]\n");
    script.push_str(&parts.cta);
    script.push('\n');

    if let Some(cues) = cues {
        script.push_str("\n[VISUAL CUES]\n");
        for cue in cues {
            script.push_str(&format!("- {}\n", cue));
        }
    }

    script
}
