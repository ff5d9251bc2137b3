use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use newsletter_core::{
    save_report, AppConfig, ConfigManager, ExecutionResult, ExportResult, NewsletterPipeline,
    PipelineStage,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "newsletter-generator")]
#[command(about = "Turn a week of newsletters into a blog post and a short-video script")]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, synthesize, generate and export
    Run {
        /// Configuration file (.yaml, .yml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Generate everything but skip the export step
        #[arg(long)]
        dry_run: bool,

        /// Write the run result as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check a configuration file and print a summary
    Validate {
        /// Configuration file (.yaml, .yml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<PathBuf>) -> Result<(PathBuf, AppConfig)> {
    let path = path.unwrap_or_else(ConfigManager::default_config_path);
    let config = ConfigManager::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok((path, config))
}

fn stage_icon(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Aggregation => "📬",
        PipelineStage::Synthesis => "🤖",
        PipelineStage::Generation => "📝",
        PipelineStage::Export => "📤",
        PipelineStage::Complete => "✅",
        PipelineStage::Error => "❌",
    }
}

fn print_export(label: &str, export: Option<&ExportResult>, dry_run: bool) {
    match export {
        Some(e) if e.remote_id.is_some() => {
            println!("  ✓ {} exported to \"{}\"", label, e.target_folder)
        }
        Some(e) if e.fallback_path.is_some() => {
            if let Some(path) = &e.fallback_path {
                println!("  ⚠ {} saved locally: {}", label, path.display());
            }
        }
        Some(e) if dry_run && e.success => println!("  - {} not exported (dry run)", label),
        Some(e) => println!(
            "  ✗ {} export failed: {}",
            label,
            e.error.as_deref().unwrap_or("unknown error")
        ),
        None => println!("  - {} not generated", label),
    }
}

fn print_summary(result: &ExecutionResult) {
    println!("\n📊 Run summary");
    println!("  Items processed: {}", result.items_processed);
    if let Some(post) = &result.blog {
        println!("  Blog post: \"{}\" ({} words)", post.title, post.word_count());
    }
    if let Some(script) = &result.script {
        println!(
            "  Video script: \"{}\" (~{:.0}s of {}s)",
            script.title,
            script.estimated_seconds(),
            script.target_duration_seconds
        );
    }
    print_export("Blog post", result.blog_export.as_ref(), result.dry_run);
    print_export("Video script", result.script_export.as_ref(), result.dry_run);

    if !result.warnings.is_empty() {
        println!("\n⚠ Warnings:");
        for warning in &result.warnings {
            println!("  • {}", warning);
        }
    }
    if !result.errors.is_empty() {
        println!("\n❌ Errors:");
        for error in &result.errors {
            println!("  • {}", error);
        }
    }
}

async fn run(config: Option<PathBuf>, dry_run: bool, report: Option<&Path>) -> Result<bool> {
    let (path, config) = load_config(config)?;

    let problems = ConfigManager::validate(&config);
    if !problems.is_empty() {
        println!("❌ Invalid configuration in {}:", path.display());
        for problem in &problems {
            println!("  ✗ {}", problem);
        }
        return Ok(false);
    }

    let config = ConfigManager::resolve_env_vars(&config)?;
    let api_key = ConfigManager::resolve_api_key(&config.llm)?;

    println!("✓ Loaded configuration from {}", path.display());
    if dry_run {
        println!("  (dry run: nothing will be exported)");
    }

    let pipeline = NewsletterPipeline::from_config(config, api_key)?.with_progress(Arc::new(
        |stage, message| println!("\n{} {}", stage_icon(stage), message),
    ));
    let result = pipeline.run(dry_run).await;

    print_summary(&result);

    if let Some(report) = report {
        let written = save_report(&result, report)?;
        println!("\n💾 Report saved to: {}", written.display());
    }

    Ok(result.success)
}

fn validate(config: Option<PathBuf>) -> Result<bool> {
    let (path, config) = load_config(config)?;
    let problems = ConfigManager::validate(&config);

    if !problems.is_empty() {
        println!("❌ {} has {} problem(s):", path.display(), problems.len());
        for problem in &problems {
            println!("  ✗ {}", problem);
        }
        return Ok(false);
    }

    println!("✅ {} is valid", path.display());
    println!("  LLM: {:?} / {}", config.llm.provider, config.llm.model);
    println!(
        "  Sources: {} mail, {} feed, {} file",
        config.email_sources.len(),
        config.rss_sources.len(),
        config.file_sources.len()
    );
    println!(
        "  Blog: {} (~{} words), video script: {}s",
        config.blog.format,
        config.blog.target_words,
        config.video_script.duration.seconds()
    );
    println!(
        "  Notes: account \"{}\", folders \"{}\" and \"{}\"",
        config.notes.account, config.notes.blog_folder, config.notes.script_folder
    );
    println!("  Window: last {} days", config.date_range_days);
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(path) = ConfigManager::load_dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let ok = match cli.command {
        Command::Run {
            config,
            dry_run,
            report,
        } => run(config, dry_run, report.as_deref()).await?,
        Command::Validate { config } => validate(config)?,
    };

    std::process::exit(if ok { 0 } else { 1 });
}
