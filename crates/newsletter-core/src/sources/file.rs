use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{info, warn};

use super::{RawRecord, RecordBody, SourceFetcher};
use crate::config::FileSourceConfig;
use crate::error::SourceError;
use crate::models::SourceType;

/// Reads saved newsletters (HTML or text) from a local directory.
pub struct FileFetcher {
    config: FileSourceConfig,
    name: String,
}

impl FileFetcher {
    pub fn new(config: FileSourceConfig) -> Self {
        let name = format!("File: {}", config.path);
        Self { config, name }
    }
}

#[async_trait]
impl SourceFetcher for FileFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<RawRecord>, SourceError> {
        // File dates may come from the name, so the window is applied after normalization.
        let config = self.config.clone();
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || scan_directory(&config, &name))
            .await
            .map_err(|e| SourceError::connectivity(self.name.clone(), e))?
    }
}

fn scan_directory(config: &FileSourceConfig, name: &str) -> Result<Vec<RawRecord>, SourceError> {
    let dir = expand_tilde(&config.path);
    if !dir.is_dir() {
        return Err(SourceError::connectivity(
            name,
            format!("{} is not a readable directory", dir.display()),
        ));
    }

    // the directory part is literal; only the configured pattern globs
    let pattern = PathBuf::from(glob::Pattern::escape(&dir.to_string_lossy())).join(&config.pattern);
    let entries = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| SourceError::parse(name, format!("bad pattern '{}': {}", config.pattern, e)))?;

    let mut records = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) if path.is_file() => path,
            Ok(_) => continue,
            Err(e) => {
                warn!(source = name, error = %e, "skipping unreadable path");
                continue;
            }
        };
        match read_record(&path, name) {
            Ok(record) => records.push(record),
            Err(e) => warn!(source = name, path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    info!(source = name, count = records.len(), "read newsletter files");
    Ok(records)
}

fn read_record(path: &Path, source_name: &str) -> std::io::Result<RawRecord> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let modified: DateTime<Utc> = fs::metadata(path)?.modified()?.into();

    let is_markup = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"));
    let body = if is_markup {
        RecordBody::Markup(text)
    } else {
        RecordBody::Plain(text)
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (title, date_hint) = split_stem(&stem);
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    Ok(RawRecord {
        source_name: source_name.to_string(),
        source_type: SourceType::File,
        title: Some(title),
        body,
        published_at: None,
        date_hint,
        fetched_at: modified,
        author: None,
        origin_url: Some(absolute.display().to_string()),
    })
}

/// Splits `2024-01-15-weekly-digest` into a readable title and a date hint.
fn split_stem(stem: &str) -> (String, Option<String>) {
    static DATE: OnceLock<Option<Regex>> = OnceLock::new();
    let date = DATE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").ok());

    let Some(found) = date.as_ref().and_then(|re| re.find(stem)) else {
        return (stem.to_string(), None);
    };

    let rest = format!("{} {}", &stem[..found.start()], &stem[found.end()..]);
    let title = rest
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let title = if title.is_empty() { stem.to_string() } else { title };
    (title, Some(found.as_str().to_string()))
}

fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(dir: &Path, pattern: &str) -> FileFetcher {
        FileFetcher::new(FileSourceConfig {
            path: dir.display().to_string(),
            pattern: pattern.to_string(),
        })
    }

    #[test]
    fn test_split_stem() {
        assert_eq!(
            split_stem("2024-01-15-weekly-digest"),
            ("weekly digest".to_string(), Some("2024-01-15".to_string()))
        );
        assert_eq!(split_stem("morning_brew"), ("morning_brew".to_string(), None));
        assert_eq!(
            split_stem("2024-01-15"),
            ("2024-01-15".to_string(), Some("2024-01-15".to_string()))
        );
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/var/mail"), PathBuf::from("/var/mail"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/news"), home.join("news"));
        }
    }

    #[tokio::test]
    async fn test_fetch_reads_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2024-01-15-rust-weekly.html"), "<p>Rust weekly issue body</p>").unwrap();
        fs::write(dir.path().join("notes.txt"), "plain notes").unwrap();
        fs::write(dir.path().join("ignored.md"), "markdown").unwrap();
        fs::create_dir(dir.path().join("sub.txt")).unwrap();

        let records = fetcher(dir.path(), "*.*").fetch(Utc::now()).await.unwrap();
        assert_eq!(records.len(), 3);

        let html = records
            .iter()
            .find(|r| r.title.as_deref() == Some("rust weekly"))
            .unwrap();
        assert!(matches!(html.body, RecordBody::Markup(_)));
        assert_eq!(html.date_hint.as_deref(), Some("2024-01-15"));
        assert!(html.origin_url.as_deref().unwrap().ends_with("2024-01-15-rust-weekly.html"));

        let txt = records.iter().find(|r| r.title.as_deref() == Some("notes")).unwrap();
        assert!(matches!(txt.body, RecordBody::Plain(_)));
        assert!(txt.source_name.starts_with("File: "));
    }

    #[tokio::test]
    async fn test_fetch_respects_pattern() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "<p>a</p>").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();

        let records = fetcher(dir.path(), "*.html").fetch(Utc::now()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_directory_with_glob_characters_is_literal() {
        let dir = tempfile::tempdir().unwrap();
        let issues = dir.path().join("issues [2024] *");
        fs::create_dir(&issues).unwrap();
        fs::write(issues.join("weekly.txt"), "weekly issue").unwrap();

        let records = fetcher(&issues, "*.txt").fetch(Utc::now()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title.as_deref(), Some("weekly"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_source_error() {
        let err = fetcher(Path::new("/definitely/not/here"), "*")
            .fetch(Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Connectivity { .. }));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decoded_lossily() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("latin1.txt"), b"caf\xe9 au lait").unwrap();

        let records = fetcher(dir.path(), "*.txt").fetch(Utc::now()).await.unwrap();
        match &records[0].body {
            RecordBody::Plain(text) => assert!(text.starts_with("caf")),
            other => panic!("unexpected body {:?}", other),
        }
    }
}
