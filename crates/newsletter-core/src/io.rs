use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::APP_DIR;
use crate::models::ExecutionResult;

/// Default directory for fallback exports
pub fn default_fallback_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join(APP_DIR)
        .join("exports");

    fs::create_dir_all(&data_dir).context("Failed to create exports directory")?;

    Ok(data_dir)
}

/// Save a run report as pretty-printed JSON
pub fn save_report(result: &ExecutionResult, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(result).context("Failed to serialize run report")?;

    fs::write(path, json)
        .with_context(|| format!("Failed to write report file: {}", path.display()))?;

    Ok(path.to_path_buf())
}

/// Load a run report written by [`save_report`]
pub fn load_report(path: &Path) -> Result<ExecutionResult> {
    if !path.exists() {
        anyhow::bail!("Report file not found: {}", path.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read report file: {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse report JSON from {}", path.display()))
}
