use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single source fetch. Isolated per source by the aggregator.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_name}: connection failed: {message}")]
    Connectivity {
        source_name: String,
        message: String,
    },

    #[error("{source_name}: authentication failed: {message}")]
    Auth {
        source_name: String,
        message: String,
    },

    #[error("{source_name}: could not parse response: {message}")]
    Parse {
        source_name: String,
        message: String,
    },
}

impl SourceError {
    pub fn connectivity(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Connectivity {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn auth(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Auth {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn source_name(&self) -> &str {
        match self {
            Self::Connectivity { source_name, .. }
            | Self::Auth { source_name, .. }
            | Self::Parse { source_name, .. } => source_name,
        }
    }
}

/// A record whose text did not survive normalization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("content is empty after cleaning")]
    Empty,

    #[error("content too short ({len} chars, minimum {min})")]
    TooShort { len: usize, min: usize },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("transient LLM failure: {0}")]
    Transient(String),

    #[error("LLM request rejected: {0}")]
    Permanent(String),
}

impl LlmError {
    /// Rate-limited and transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("note sink is unavailable")]
    Unavailable,

    #[error("could not create folder '{0}'")]
    Folder(String),

    #[error("note sink failed: {0}")]
    Sink(String),

    #[error("fallback write to {} failed: {source}", path.display())]
    Fallback {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported configuration format '{0}' (use .yaml, .yml or .json)")]
    UnsupportedFormat(String),

    #[error("configuration file {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),

    #[error("environment variable {var} is not set ({purpose})")]
    MissingEnv { var: String, purpose: String },

    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Transient("timeout".into()).is_retryable());
        assert!(LlmError::RateLimited {
            message: "slow down".into(),
            retry_after: None
        }
        .is_retryable());
        assert!(!LlmError::Permanent("bad request".into()).is_retryable());
    }

    #[test]
    fn test_source_error_carries_source_name() {
        let err = SourceError::auth("Email: imap.example.com", "bad password");
        assert_eq!(err.source_name(), "Email: imap.example.com");
        assert!(err.to_string().contains("authentication failed"));
    }

    #[test]
    fn test_invalid_config_lists_every_problem() {
        let err = ConfigError::Invalid(vec!["first".into(), "second".into()]);
        let text = err.to_string();
        assert!(text.contains("first"));
        assert!(text.contains("second"));
    }
}
