//! Delivers finished artifacts to the note sink, falling back to a local
//! Markdown file when the sink cannot take them.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ExportError;
use crate::models::{BlogPost, ExportResult, ShortVideoScript};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Blog,
    VideoScript,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Blog => f.write_str("blog"),
            ArtifactKind::VideoScript => f.write_str("video-script"),
        }
    }
}

/// Anything the coordinator can export.
pub trait ExportArtifact: Send + Sync {
    fn kind(&self) -> ArtifactKind;
    fn title(&self) -> &str;
    fn body(&self) -> &str;
    fn generated_at(&self) -> DateTime<Utc>;
}

impl ExportArtifact for BlogPost {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Blog
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn body(&self) -> &str {
        self.markdown_body()
    }

    fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

impl ExportArtifact for ShortVideoScript {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::VideoScript
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn body(&self) -> &str {
        &self.full_script
    }

    fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteMetadata {
    pub kind: ArtifactKind,
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<String>,
}

/// Primary export destination.
#[async_trait]
pub trait NoteSink: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Creates `folder` if it does not exist. `false` when that fails.
    async fn ensure_folder(&self, folder: &str) -> bool;

    /// Returns the new note's identifier.
    async fn create_note(
        &self,
        folder: &str,
        title: &str,
        body: &str,
        metadata: &NoteMetadata,
    ) -> Result<String, ExportError>;
}

#[derive(Serialize)]
struct FrontMatter<'a> {
    title: &'a str,
    kind: ArtifactKind,
    generated_at: DateTime<Utc>,
    target_folder: &'a str,
    export_error: String,
    sources: &'a [String],
}

pub struct ExportCoordinator {
    sink: Arc<dyn NoteSink>,
    fallback_dir: PathBuf,
}

impl ExportCoordinator {
    pub fn new(sink: Arc<dyn NoteSink>, fallback_dir: PathBuf) -> Self {
        Self { sink, fallback_dir }
    }

    pub fn fallback_dir(&self) -> &Path {
        &self.fallback_dir
    }

    /// Sends `artifact` to the sink, or writes the fallback file on any sink
    /// failure. Only a failed fallback write is an error.
    pub async fn export(
        &self,
        artifact: &dyn ExportArtifact,
        folder: &str,
        sources: &BTreeSet<String>,
    ) -> Result<ExportResult, ExportError> {
        let metadata = NoteMetadata {
            kind: artifact.kind(),
            generated_at: artifact.generated_at(),
            sources: sources.iter().cloned().collect(),
        };

        match self.send_to_sink(artifact, folder, &metadata).await {
            Ok(id) => {
                info!(kind = %metadata.kind, folder, id = %id, "exported to notes");
                Ok(ExportResult::exported(folder, id))
            }
            Err(err) => {
                warn!(kind = %metadata.kind, folder, error = %err, "note export failed, writing fallback file");
                let path = self.write_fallback(artifact, folder, &metadata, &err)?;
                info!(path = %path.display(), "wrote fallback file");
                Ok(ExportResult::fallback(folder, path, err.to_string()))
            }
        }
    }

    async fn send_to_sink(
        &self,
        artifact: &dyn ExportArtifact,
        folder: &str,
        metadata: &NoteMetadata,
    ) -> Result<String, ExportError> {
        if !self.sink.is_available().await {
            return Err(ExportError::Unavailable);
        }
        if !self.sink.ensure_folder(folder).await {
            return Err(ExportError::Folder(folder.to_string()));
        }
        let body = note_body(artifact, metadata);
        self.sink
            .create_note(folder, artifact.title(), &body, metadata)
            .await
    }

    /// `<dir>/<kind>-<YYYYMMDD-HHMMSS>.md`
    pub fn fallback_path(&self, kind: ArtifactKind, generated_at: DateTime<Utc>) -> PathBuf {
        self.fallback_dir.join(format!(
            "{}-{}.md",
            kind,
            generated_at.format("%Y%m%d-%H%M%S")
        ))
    }

    fn write_fallback(
        &self,
        artifact: &dyn ExportArtifact,
        folder: &str,
        metadata: &NoteMetadata,
        cause: &ExportError,
    ) -> Result<PathBuf, ExportError> {
        let path = self.fallback_path(metadata.kind, metadata.generated_at);
        let front_matter = FrontMatter {
            title: artifact.title(),
            kind: metadata.kind,
            generated_at: metadata.generated_at,
            target_folder: folder,
            export_error: cause.to_string(),
            sources: &metadata.sources,
        };
        let yaml = serde_yaml::to_string(&front_matter).map_err(|e| ExportError::Fallback {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        let document = format!("---\n{}---\n\n{}\n", yaml, artifact.body().trim_end());

        fs::create_dir_all(&self.fallback_dir)
            .and_then(|_| fs::write(&path, document))
            .map_err(|source| ExportError::Fallback {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

/// Artifact body preceded by a short metadata header.
fn note_body(artifact: &dyn ExportArtifact, metadata: &NoteMetadata) -> String {
    format!(
        "Generated: {}\nSources: {}\n\n{}",
        metadata.generated_at.format("%Y-%m-%d %H:%M UTC"),
        metadata.sources.join(", "),
        artifact.body()
    )
}
