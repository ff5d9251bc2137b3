//! Text-completion boundary. Providers are interchangeable behind
//! [`LlmClient`]; [`from_config`] picks one and wraps it in the retry policy.

mod anthropic;
mod openai;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::config::{LlmConfig, LlmProvider};
use crate::error::LlmError;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;
pub use retry::{RetryPolicy, RetryingClient};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError>;
}

/// Provider client for `config`, with retries applied.
pub fn from_config(config: &LlmConfig, api_key: String) -> Result<Arc<dyn LlmClient>> {
    let provider: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Anthropic => Arc::new(AnthropicClient::new(config, api_key)?),
        LlmProvider::Openai => Arc::new(OpenAiClient::new(config, api_key)?),
    };
    Ok(Arc::new(RetryingClient::new(
        provider,
        RetryPolicy::from_config(config),
    )))
}

/// Maps a non-success HTTP status to the retry taxonomy.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> LlmError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return LlmError::RateLimited {
            message,
            retry_after,
        };
    }
    // includes Anthropic's 529 "overloaded"
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return LlmError::Transient(message);
    }
    LlmError::Permanent(message)
}

pub(crate) fn classify_transport(err: reqwest::Error) -> LlmError {
    if err.is_decode() {
        LlmError::Permanent(format!("malformed response: {}", err))
    } else {
        LlmError::Transient(err.to_string())
    }
}

/// Slices from the first `{` to the last `}` so prose around a JSON answer
/// does not break parsing.
pub fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Parses `-`, `*`, `•` and numbered list lines. Other lines are ignored.
pub fn parse_bullets(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
                let stripped = trimmed
                    .trim_start_matches(|c: char| c.is_ascii_digit())
                    .trim_start_matches(|c: char| c == '.' || c == ')' || c.is_whitespace());
                return (!stripped.is_empty()).then(|| stripped.to_string());
            }
            let stripped = trimmed
                .strip_prefix('-')
                .or_else(|| trimmed.strip_prefix('*'))
                .or_else(|| trimmed.strip_prefix('•'))?
                .trim();
            (!stripped.is_empty()).then(|| stripped.to_string())
        })
        .collect()
}

/// Truncates on a char boundary.
pub fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
