use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Directory name used under the platform config and data directories.
pub const APP_DIR: &str = "newsletter-generator";

/// Ten years; wider windows overflow timestamp arithmetic.
pub const MAX_DATE_RANGE_DAYS: u32 = 3650;
/// One day.
pub const MAX_RUN_TIMEOUT_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub blog: BlogConfig,
    #[serde(alias = "tiktok")]
    pub video_script: VideoScriptConfig,
    pub notes: NotesConfig,
    #[serde(default)]
    pub email_sources: Vec<EmailSourceConfig>,
    #[serde(default)]
    pub rss_sources: Vec<RssSourceConfig>,
    #[serde(default)]
    pub file_sources: Vec<FileSourceConfig>,
    #[serde(default = "default_date_range_days")]
    pub date_range_days: u32,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl AppConfig {
    pub fn source_count(&self) -> usize {
        self.email_sources.len() + self.rss_sources.len() + self.file_sources.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Plain value or a `${VAR}` reference resolved at startup.
    pub password: String,
    pub folder: String,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssSourceConfig {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSourceConfig {
    pub path: String,
    #[serde(default = "default_file_pattern")]
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    #[serde(alias = "open-ai")]
    Openai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Approximate token budget per clustering request.
    #[serde(default = "default_batch_token_budget")]
    pub batch_token_budget: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlogFormat {
    #[serde(rename = "long-form")]
    LongForm,
    #[serde(rename = "summary")]
    Summary,
    #[serde(rename = "listicle")]
    Listicle,
}

impl fmt::Display for BlogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlogFormat::LongForm => "long-form",
            BlogFormat::Summary => "summary",
            BlogFormat::Listicle => "listicle",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogConfig {
    pub format: BlogFormat,
    pub target_words: usize,
    #[serde(default = "default_true")]
    pub include_sources: bool,
}

/// Supported short-video lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ScriptDuration {
    Fifteen,
    Thirty,
    Sixty,
}

impl ScriptDuration {
    pub fn seconds(self) -> u32 {
        match self {
            ScriptDuration::Fifteen => 15,
            ScriptDuration::Thirty => 30,
            ScriptDuration::Sixty => 60,
        }
    }
}

impl TryFrom<u32> for ScriptDuration {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            15 => Ok(ScriptDuration::Fifteen),
            30 => Ok(ScriptDuration::Thirty),
            60 => Ok(ScriptDuration::Sixty),
            other => Err(format!("duration must be 15, 30 or 60 seconds, got {}", other)),
        }
    }
}

impl From<ScriptDuration> for u32 {
    fn from(d: ScriptDuration) -> u32 {
        d.seconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStyle {
    #[default]
    Educational,
    Entertaining,
    News,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoScriptConfig {
    pub duration: ScriptDuration,
    #[serde(default = "default_true")]
    pub include_visual_cues: bool,
    #[serde(default)]
    pub style: ScriptStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesConfig {
    pub account: String,
    pub blog_folder: String,
    #[serde(alias = "tiktok_folder")]
    pub script_folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_file_pattern() -> String {
    "*".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_concurrency() -> usize {
    2
}

fn default_batch_token_budget() -> usize {
    8000
}

fn default_date_range_days() -> u32 {
    7
}

fn default_run_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Loads, saves, validates and resolves [`AppConfig`] files.
pub struct ConfigManager;

impl ConfigManager {
    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let format = ConfigFormat::from_path(path)?;

        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Err(ConfigError::Empty(path.to_path_buf()));
        }

        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        match format {
            ConfigFormat::Yaml => {
                serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))
            }
            ConfigFormat::Json => {
                serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))
            }
        }
    }

    pub fn save(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let serialized = match format {
            ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
        }
        .map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Collects every problem in the configuration. Empty means valid.
    pub fn validate(config: &AppConfig) -> Vec<String> {
        let mut errors = Vec::new();

        if config.source_count() == 0 {
            errors.push(
                "sources: at least one email, rss or file source must be configured".to_string(),
            );
        }

        for (i, source) in config.email_sources.iter().enumerate() {
            let prefix = format!("email_sources[{}]", i);
            if source.host.trim().is_empty() {
                errors.push(format!("{}.host: host is required", prefix));
            }
            if source.port == 0 {
                errors.push(format!("{}.port: port must be between 1 and 65535", prefix));
            }
            if source.username.trim().is_empty() {
                errors.push(format!("{}.username: username is required", prefix));
            }
            if source.password.trim().is_empty() {
                errors.push(format!("{}.password: password is required", prefix));
            }
            if source.folder.trim().is_empty() {
                errors.push(format!("{}.folder: folder is required", prefix));
            }
        }

        for (i, source) in config.rss_sources.iter().enumerate() {
            let prefix = format!("rss_sources[{}]", i);
            if source.url.trim().is_empty() {
                errors.push(format!("{}.url: URL is required", prefix));
            } else if !is_valid_feed_url(&source.url) {
                errors.push(format!(
                    "{}.url: '{}' is not a valid http(s) URL",
                    prefix, source.url
                ));
            }
            if source.name.trim().is_empty() {
                errors.push(format!("{}.name: name is required", prefix));
            }
        }

        for (i, source) in config.file_sources.iter().enumerate() {
            let prefix = format!("file_sources[{}]", i);
            if source.path.trim().is_empty() {
                errors.push(format!("{}.path: path is required", prefix));
            }
            if source.pattern.trim().is_empty() {
                errors.push(format!("{}.pattern: pattern is required", prefix));
            }
        }

        let llm = &config.llm;
        if llm.model.trim().is_empty() {
            errors.push("llm.model: model name is required".to_string());
        }
        if llm.api_key_env.trim().is_empty() {
            errors.push("llm.api_key_env: API key environment variable name is required".to_string());
        }
        if llm.max_tokens == 0 {
            errors.push("llm.max_tokens: must be positive".to_string());
        }
        if llm.max_attempts == 0 {
            errors.push("llm.max_attempts: must be at least 1".to_string());
        }
        if llm.max_concurrency == 0 {
            errors.push("llm.max_concurrency: must be at least 1".to_string());
        }
        if let Some(base_url) = &llm.base_url {
            if !is_valid_feed_url(base_url) {
                errors.push(format!("llm.base_url: '{}' is not a valid http(s) URL", base_url));
            }
        }

        if config.blog.target_words == 0 {
            errors.push("blog.target_words: must be positive".to_string());
        }

        let notes = &config.notes;
        if notes.account.trim().is_empty() {
            errors.push("notes.account: account name is required".to_string());
        }
        if notes.blog_folder.trim().is_empty() {
            errors.push("notes.blog_folder: folder name is required".to_string());
        }
        if notes.script_folder.trim().is_empty() {
            errors.push("notes.script_folder: folder name is required".to_string());
        }

        if config.date_range_days == 0 || config.date_range_days > MAX_DATE_RANGE_DAYS {
            errors.push(format!(
                "date_range_days: must be between 1 and {}",
                MAX_DATE_RANGE_DAYS
            ));
        }
        if config.run_timeout_secs == 0 || config.run_timeout_secs > MAX_RUN_TIMEOUT_SECS {
            errors.push(format!(
                "run_timeout_secs: must be between 1 and {}",
                MAX_RUN_TIMEOUT_SECS
            ));
        }

        errors
    }

    /// Replaces `${VAR}` references in mail passwords with their values.
    pub fn resolve_env_vars(config: &AppConfig) -> Result<AppConfig, ConfigError> {
        let mut resolved = config.clone();
        for (i, source) in resolved.email_sources.iter_mut().enumerate() {
            if let Some(var) = env_reference(&source.password) {
                source.password = env::var(var).map_err(|_| ConfigError::MissingEnv {
                    var: var.to_string(),
                    purpose: format!("email_sources[{}].password", i),
                })?;
            }
        }
        Ok(resolved)
    }

    pub fn resolve_api_key(llm: &LlmConfig) -> Result<String, ConfigError> {
        env::var(&llm.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv {
                var: llm.api_key_env.clone(),
                purpose: "LLM API key".to_string(),
            })
    }

    /// Loads the first `.env` found: working directory, then the app config
    /// directory, then the home directory. Absence is not an error.
    pub fn load_dotenv() -> Option<PathBuf> {
        if let Ok(path) = dotenvy::dotenv() {
            return Some(path);
        }

        let candidates = [
            dirs::config_dir().map(|d| d.join(APP_DIR).join(".env")),
            dirs::home_dir().map(|d| d.join(".env")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.exists() && dotenvy::from_path(&path).is_ok() {
                return Some(path);
            }
        }

        None
    }

    /// `config.yaml` in the working directory, else the app config directory.
    pub fn default_config_path() -> PathBuf {
        let local = PathBuf::from("config.yaml");
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join("config.yaml"))
            .filter(|p| p.exists())
            .unwrap_or(local)
    }
}

fn env_reference(value: &str) -> Option<&str> {
    let name = value.trim().strip_prefix("${")?.strip_suffix('}')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Some(name)
    } else {
        None
    }
}

fn is_valid_feed_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
