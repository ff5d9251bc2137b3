#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use newsletter_core::config::{
    AppConfig, BlogConfig, BlogFormat, LlmConfig, LlmProvider, NotesConfig, ScriptDuration,
    ScriptStyle, VideoScriptConfig,
};
use newsletter_core::{
    ExportError, LlmClient, LlmError, NoteMetadata, NoteSink, RawRecord, RecordBody,
    SourceError, SourceFetcher, SourceType,
};

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// LLM stub answering from a closure and counting calls.
pub struct ScriptedLlm {
    responder: Responder,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers every pipeline prompt with a plausible response.
    pub fn newsroom() -> Arc<Self> {
        Self::new(newsroom_response)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(prompt)
    }
}

fn newsroom_response(prompt: &str) -> Result<String, LlmError> {
    if prompt.contains("short-video script") {
        return Ok("TITLE: This Week in Systems\n\
                   HOOK: Three releases changed how teams ship software this week.\n\
                   POINTS:\n\
                   - Rust made lazy statics part of the standard library.\n\
                   - Postgres added incremental backups for large clusters.\n\
                   CTA: Follow for next week's roundup.\n\
                   VISUAL CUES:\n\
                   - Release notes scrolling\n\
                   - Backup progress bar\n"
            .to_string());
    }
    if prompt.contains("blog post") {
        let mut post = String::from("# This Week in Systems\n\nA lot happened.\n\n");
        for heading in ["Introduction", "Rust", "Databases", "Tooling", "Closing Thoughts"] {
            post.push_str(&format!("## {}\n\n", heading));
            for n in 0..4 {
                post.push_str(&format!(
                    "Paragraph {} about {} covers releases, upgrades and what teams should do next.\n\n",
                    n, heading
                ));
            }
        }
        return Ok(post);
    }
    if prompt.contains("article_indices") {
        return Ok(r#"{"topics": [{"title": "Systems", "description": "Releases across the stack.", "article_indices": [0, 1, 2, 3, 4, 5]}]}"#.to_string());
    }
    if prompt.contains("Extract the key points") {
        return Ok("- Rust stabilized LazyLock\n- Postgres added incremental backup\n- Cargo builds got faster".to_string());
    }
    Ok(r#"{"summary": "A week of systems releases.", "trending_themes": ["Releases"]}"#.to_string())
}

pub fn config(dir: &std::path::Path) -> AppConfig {
    AppConfig {
        llm: LlmConfig {
            provider: LlmProvider::Anthropic,
            model: "claude-test".to_string(),
            api_key_env: "TEST_API_KEY".to_string(),
            max_tokens: 1024,
            base_url: None,
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_concurrency: 2,
            batch_token_budget: 8000,
        },
        blog: BlogConfig {
            format: BlogFormat::LongForm,
            target_words: 200,
            include_sources: true,
        },
        video_script: VideoScriptConfig {
            duration: ScriptDuration::Thirty,
            include_visual_cues: true,
            style: ScriptStyle::Educational,
        },
        notes: NotesConfig {
            account: "iCloud".to_string(),
            blog_folder: "Blog Drafts".to_string(),
            script_folder: "Video Scripts".to_string(),
            fallback_dir: Some(dir.to_path_buf()),
        },
        email_sources: Vec::new(),
        rss_sources: Vec::new(),
        file_sources: Vec::new(),
        date_range_days: 7,
        run_timeout_secs: 60,
    }
}

/// Serves records published `age_days` ago.
pub struct StaticFetcher {
    pub name: String,
    pub age_days: Vec<i64>,
}

impl StaticFetcher {
    pub fn new(name: &str, age_days: &[i64]) -> Arc<dyn SourceFetcher> {
        Arc::new(Self {
            name: name.to_string(),
            age_days: age_days.to_vec(),
        })
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Feed
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        let now = Utc::now();
        Ok(self
            .age_days
            .iter()
            .enumerate()
            .map(|(i, age)| RawRecord {
                source_name: self.name.clone(),
                source_type: SourceType::Feed,
                title: Some(format!("{} issue {}", self.name, i)),
                body: RecordBody::Plain(
                    (0..25)
                        .map(|n| {
                            format!(
                                "Story {} in issue {} of {} describes a notable release.",
                                n, i, self.name
                            )
                        })
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                published_at: Some(now - Duration::days(*age) - Duration::minutes(5)),
                date_hint: None,
                fetched_at: now,
                author: None,
                origin_url: None,
            })
            .collect())
    }
}

/// Serves one record with no publication date, stamped at fetch time.
pub struct UndatedFetcher(pub &'static str);

#[async_trait]
impl SourceFetcher for UndatedFetcher {
    fn name(&self) -> &str {
        self.0
    }

    fn source_type(&self) -> SourceType {
        SourceType::Feed
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        Ok(vec![RawRecord {
            source_name: self.0.to_string(),
            source_type: SourceType::Feed,
            title: None,
            body: RecordBody::Plain(
                "An entry that carries no date at all but still has a full paragraph of text."
                    .to_string(),
            ),
            published_at: None,
            date_hint: None,
            fetched_at: Utc::now(),
            author: None,
            origin_url: None,
        }])
    }
}

pub struct FailingFetcher(pub &'static str);

#[async_trait]
impl SourceFetcher for FailingFetcher {
    fn name(&self) -> &str {
        self.0
    }

    fn source_type(&self) -> SourceType {
        SourceType::Mail
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        Err(SourceError::auth(self.0, "invalid credentials"))
    }
}

/// Note sink recording every call, optionally reporting itself unavailable.
#[derive(Default)]
pub struct RecordingSink {
    pub unavailable: bool,
    pub calls: AtomicUsize,
    pub notes: Mutex<Vec<(String, String, NoteMetadata)>>,
}

impl RecordingSink {
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            unavailable: true,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NoteSink for RecordingSink {
    async fn is_available(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        !self.unavailable
    }

    async fn ensure_folder(&self, _folder: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn create_note(
        &self,
        folder: &str,
        title: &str,
        _body: &str,
        metadata: &NoteMetadata,
    ) -> Result<String, ExportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut notes = self.notes.lock().unwrap();
        notes.push((folder.to_string(), title.to_string(), metadata.clone()));
        Ok(format!("x-coredata://note/{}", notes.len()))
    }
}
