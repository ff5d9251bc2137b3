// Public modules
pub mod aggregator;
pub mod clustering;
pub mod config;
pub mod error;
pub mod exporter;
pub mod generators;
pub mod io;
pub mod llm;
pub mod models;
pub mod notes;
pub mod parser;
pub mod pipeline;
pub mod sources;
pub mod synthesizer;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use aggregator::{AggregationReport, Aggregator};
pub use clustering::TopicClusterer;
pub use config::{AppConfig, ConfigManager};
pub use error::{ConfigError, ContentError, ExportError, LlmError, SourceError};
pub use exporter::{ArtifactKind, ExportArtifact, ExportCoordinator, NoteMetadata, NoteSink};
pub use generators::{BlogGenerator, ScriptGenerator};
pub use io::{default_fallback_dir, load_report, save_report};
pub use llm::LlmClient;
pub use models::{
    BlogPost, ExecutionResult, ExportResult, NewsletterItem, ShortVideoScript, SourceType,
    SynthesizedContent, TopicGroup,
};
pub use notes::AppleNotesSink;
pub use parser::ContentParser;
pub use pipeline::{NewsletterPipeline, PipelineStage, ProgressCallback};
pub use sources::{RawRecord, RecordBody, SourceFetcher};
pub use synthesizer::{ContentSynthesizer, SynthesisStage};
