//! Stubs shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::LlmError;
use crate::llm::LlmClient;
use crate::models::{NewsletterItem, SourceType};

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// LLM stub answering from a closure and counting calls.
pub struct ScriptedLlm {
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(LlmError::Permanent("stub failure".to_string())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.responder)(prompt)
    }
}

pub fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap()
}

pub fn item(source: &str, title: &str, content: &str, day: u32) -> NewsletterItem {
    NewsletterItem {
        source_name: source.to_string(),
        source_type: SourceType::Feed,
        title: title.to_string(),
        content: content.to_string(),
        raw_markup: None,
        published_at: ts(day),
        author: None,
        origin_url: None,
        merged_sources: Vec::new(),
    }
}

/// Repeats a sentence until the text holds at least `words` words.
pub fn filler(words: usize, sentence: &str) -> String {
    let per = sentence.split_whitespace().count().max(1);
    let reps = words.div_ceil(per);
    vec![sentence; reps].join(" ")
}
