//! End-to-end run: aggregate, synthesize, generate, export.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::{AppConfig, MAX_DATE_RANGE_DAYS, MAX_RUN_TIMEOUT_SECS};
use crate::exporter::{ExportArtifact, ExportCoordinator, NoteSink};
use crate::generators::{BlogGenerator, ScriptGenerator};
use crate::io::default_fallback_dir;
use crate::llm::{self, LlmClient};
use crate::models::{ExecutionResult, ExportResult, SourceFailure, SynthesizedContent};
use crate::notes::AppleNotesSink;
use crate::parser::ContentParser;
use crate::sources::{build_fetchers, SourceFetcher};
use crate::synthesizer::ContentSynthesizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Aggregation,
    Synthesis,
    Generation,
    Export,
    Complete,
    Error,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Aggregation => "aggregation",
            PipelineStage::Synthesis => "synthesis",
            PipelineStage::Generation => "generation",
            PipelineStage::Export => "export",
            PipelineStage::Complete => "complete",
            PipelineStage::Error => "error",
        };
        f.write_str(name)
    }
}

pub type ProgressCallback = Arc<dyn Fn(PipelineStage, &str) + Send + Sync>;

pub struct NewsletterPipeline {
    config: Arc<AppConfig>,
    aggregator: Aggregator,
    synthesizer: ContentSynthesizer,
    blog: BlogGenerator,
    script: ScriptGenerator,
    exporter: ExportCoordinator,
    progress: Option<ProgressCallback>,
}

impl NewsletterPipeline {
    /// Wires real fetchers, the configured LLM provider and Apple Notes.
    pub fn from_config(config: AppConfig, api_key: String) -> Result<Self> {
        let fetchers = build_fetchers(&config)?;
        let llm = llm::from_config(&config.llm, api_key)?;
        let sink = Arc::new(AppleNotesSink::new(config.notes.account.clone()));
        let fallback_dir = match &config.notes.fallback_dir {
            Some(dir) => dir.clone(),
            None => default_fallback_dir()?,
        };
        Ok(Self::with_components(config, fetchers, llm, sink, fallback_dir))
    }

    pub fn with_components(
        config: AppConfig,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
        llm: Arc<dyn LlmClient>,
        sink: Arc<dyn NoteSink>,
        fallback_dir: PathBuf,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            aggregator: Aggregator::new(fetchers, ContentParser::new()),
            synthesizer: ContentSynthesizer::new(llm.clone(), &config.llm),
            blog: BlogGenerator::new(llm.clone(), config.blog.clone()),
            script: ScriptGenerator::new(llm, config.video_script.clone()),
            exporter: ExportCoordinator::new(sink, fallback_dir),
            progress: None,
            config,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, stage: PipelineStage, message: &str) {
        info!(%stage, "{}", message);
        if let Some(progress) = &self.progress {
            progress(stage, message);
        }
    }

    /// Always returns a structurally complete result; failures are recorded
    /// in `errors` and notices in `warnings` rather than returned.
    pub async fn run(&self, dry_run: bool) -> ExecutionResult {
        let deadline = Instant::now()
            + Duration::from_secs(self.config.run_timeout_secs.min(MAX_RUN_TIMEOUT_SECS));
        let mut result = ExecutionResult {
            success: false,
            items_processed: 0,
            blog_export: None,
            script_export: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            dry_run,
            source_failures: Vec::new(),
            blog: None,
            script: None,
        };

        let window_days = self.config.date_range_days.min(MAX_DATE_RANGE_DAYS);
        let since = Utc::now() - chrono::Duration::days(i64::from(window_days));
        self.report(
            PipelineStage::Aggregation,
            &format!("Fetching from {} sources", self.aggregator.source_count()),
        );
        let Ok(report) = timeout_at(deadline, self.aggregator.aggregate(since, None)).await else {
            return self.timed_out(result, PipelineStage::Aggregation);
        };

        for (source_name, err) in &report.failures {
            result.errors.push(err.to_string());
            result.source_failures.push(SourceFailure {
                source_name: source_name.clone(),
                message: err.to_string(),
            });
        }
        result.items_processed = report.items.len();

        if report.items.is_empty() {
            if report.all_sources_failed(self.aggregator.source_count()) {
                result.errors.push(format!(
                    "All {} sources failed; nothing to synthesize",
                    self.aggregator.source_count()
                ));
                self.report(PipelineStage::Error, "All sources failed");
            } else {
                result.success = true;
                result
                    .warnings
                    .push("No newsletter items found in the configured date range".to_string());
                self.report(PipelineStage::Complete, "No items found, nothing to generate");
            }
            return result;
        }

        self.report(
            PipelineStage::Synthesis,
            &format!("Synthesizing {} items", report.items.len()),
        );
        let Ok(content) = timeout_at(deadline, self.synthesizer.synthesize(report.items)).await else {
            return self.timed_out(result, PipelineStage::Synthesis);
        };
        let content = Arc::new(content);

        self.report(
            PipelineStage::Generation,
            &format!("Writing blog post and video script from {} topics", content.topics.len()),
        );
        let generation = async {
            tokio::join!(self.blog.generate(&content), self.script.generate(&content))
        };
        let Ok((post, script)) = timeout_at(deadline, generation).await else {
            return self.timed_out(result, PipelineStage::Generation);
        };

        if dry_run {
            self.report(PipelineStage::Export, "Dry run, skipping export");
            result.blog_export = Some(ExportResult::skipped(&self.config.notes.blog_folder));
            result.script_export = Some(ExportResult::skipped(&self.config.notes.script_folder));
        } else {
            self.report(PipelineStage::Export, "Exporting to notes");
            let blog_export = self
                .export(&post, &self.config.notes.blog_folder, &content, &mut result)
                .await;
            result.blog_export = Some(blog_export);
            let script_export = self
                .export(&script, &self.config.notes.script_folder, &content, &mut result)
                .await;
            result.script_export = Some(script_export);
        }

        let hard_failure = [&result.blog_export, &result.script_export]
            .into_iter()
            .flatten()
            .any(|r| !r.success && r.fallback_path.is_none());
        result.success = !hard_failure;
        result.blog = Some(post);
        result.script = Some(script);

        let summary = format!(
            "Processed {} items into {} topics",
            result.items_processed,
            content.topics.len()
        );
        if result.success {
            self.report(PipelineStage::Complete, &summary);
        } else {
            self.report(PipelineStage::Error, &summary);
        }
        result
    }

    async fn export(
        &self,
        artifact: &dyn ExportArtifact,
        folder: &str,
        content: &SynthesizedContent,
        result: &mut ExecutionResult,
    ) -> ExportResult {
        match self.exporter.export(artifact, folder, &content.sources()).await {
            Ok(export) => {
                if let (Some(path), Some(err)) = (&export.fallback_path, &export.error) {
                    result.warnings.push(format!(
                        "{} saved to {} instead of notes: {}",
                        artifact.kind(),
                        path.display(),
                        err
                    ));
                }
                export
            }
            Err(e) => {
                error!(kind = %artifact.kind(), error = %e, "export failed");
                result
                    .errors
                    .push(format!("{} export failed: {}", artifact.kind(), e));
                ExportResult::failed(folder, e.to_string())
            }
        }
    }

    fn timed_out(&self, mut result: ExecutionResult, stage: PipelineStage) -> ExecutionResult {
        let message = format!(
            "Run timed out after {}s during {}",
            self.config.run_timeout_secs, stage
        );
        warn!(%stage, "run timed out");
        self.report(PipelineStage::Error, &message);
        result.success = false;
        result.errors.push(message);
        result
    }
}
