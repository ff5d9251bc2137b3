//! Apple Notes sink driven through `osascript`.
//!
//! Values reach the scripts as `argv`, never spliced into script text, so
//! titles and bodies need no AppleScript escaping.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ExportError;
use crate::exporter::{NoteMetadata, NoteSink};

const OSASCRIPT: &str = "osascript";

const PROBE_SCRIPT: &str = r#"on run argv
    tell application "Notes" to return name of account (item 1 of argv)
end run"#;

const ENSURE_FOLDER_SCRIPT: &str = r#"on run argv
    set accountName to item 1 of argv
    set folderName to item 2 of argv
    tell application "Notes"
        tell account accountName
            if not (exists folder folderName) then make new folder with properties {name:folderName}
        end tell
    end tell
    return "ok"
end run"#;

const CREATE_NOTE_SCRIPT: &str = r#"on run argv
    set accountName to item 1 of argv
    set folderName to item 2 of argv
    set noteBody to item 3 of argv
    tell application "Notes"
        set newNote to make new note at folder folderName of account accountName with properties {body:noteBody}
        return id of newNote
    end tell
end run"#;

pub struct AppleNotesSink {
    account: String,
}

impl AppleNotesSink {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    async fn run_script(&self, script: &str, args: &[&str]) -> Result<String, ExportError> {
        let output = Command::new(OSASCRIPT)
            .arg("-e")
            .arg(script)
            .args(args)
            .output()
            .await
            .map_err(|e| ExportError::Sink(format!("failed to execute osascript: {}", e)))?;

        if !output.status.success() {
            return Err(ExportError::Sink(format!(
                "osascript failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl NoteSink for AppleNotesSink {
    async fn is_available(&self) -> bool {
        if !cfg!(target_os = "macos") {
            return false;
        }
        match self.run_script(PROBE_SCRIPT, &[&self.account]).await {
            Ok(_) => true,
            Err(e) => {
                warn!(account = %self.account, error = %e, "Apple Notes is not reachable");
                false
            }
        }
    }

    async fn ensure_folder(&self, folder: &str) -> bool {
        match self.run_script(ENSURE_FOLDER_SCRIPT, &[&self.account, folder]).await {
            Ok(_) => true,
            Err(e) => {
                warn!(folder, error = %e, "could not create notes folder");
                false
            }
        }
    }

    async fn create_note(
        &self,
        folder: &str,
        title: &str,
        body: &str,
        metadata: &NoteMetadata,
    ) -> Result<String, ExportError> {
        debug!(folder, kind = %metadata.kind, "creating note");
        let html = note_html(title, body);
        let id = self
            .run_script(CREATE_NOTE_SCRIPT, &[&self.account, folder, &html])
            .await?;
        if id.is_empty() {
            return Err(ExportError::Sink("Notes returned no note id".to_string()));
        }
        Ok(id)
    }
}

/// Notes stores bodies as HTML; its first line becomes the note title.
pub fn note_html(title: &str, markdown: &str) -> String {
    let mut html = format!("<h1>{}</h1>\n", escape_html(title));
    let mut in_list = false;

    for line in markdown.lines() {
        let trimmed = line.trim();
        let bullet = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* "));

        if bullet.is_none() && in_list {
            html.push_str("</ul>\n");
            in_list = false;
        }

        if let Some(item) = bullet {
            if !in_list {
                html.push_str("<ul>\n");
                in_list = true;
            }
            html.push_str(&format!("<li>{}</li>\n", escape_html(item)));
        } else if trimmed.starts_with("# ") {
            // title already rendered
            continue;
        } else if let Some(heading) = trimmed.strip_prefix("## ") {
            html.push_str(&format!("<h2>{}</h2>\n", escape_html(heading)));
        } else if let Some(heading) = trimmed.strip_prefix("### ") {
            html.push_str(&format!("<h3>{}</h3>\n", escape_html(heading)));
        } else if trimmed.is_empty() {
            continue;
        } else {
            html.push_str(&format!("<div>{}</div>\n", escape_html(trimmed)));
        }
    }
    if in_list {
        html.push_str("</ul>\n");
    }
    html
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
