//! Create command handler.
//!
//! Loads documents from a JSONL file or a directory tree and builds the
//! dataset's index.

use clap::Args;
use docindex_core::{AppConfig, AppError, AppResult};
use docindex_vector::chunker::ChunkConfig;
use docindex_vector::ingest::{load_directory, load_jsonl};
use docindex_vector::{
    Cancellation, CreatePolicy, IndexManager, ProgressEvent, ProgressReporter,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Index documents for a dataset
#[derive(Args, Debug)]
pub struct CreateCommand {
    /// Dataset identifier (ASCII letters, digits and '-')
    pub dataset: String,

    /// JSONL file, one {"text", "document_id", "metadata"} object per line
    #[arg(short, long, conflicts_with = "path", required_unless_present = "path")]
    pub file: Option<PathBuf>,

    /// Directory of text files, one source document per file
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// What to do when the dataset is already indexed (fail, overwrite, append)
    #[arg(long, default_value = "fail")]
    pub policy: CreatePolicy,

    /// Chunk size in bytes for --path
    #[arg(long, default_value = "1000")]
    pub chunk_size: usize,

    /// Overlap between chunks in bytes for --path
    #[arg(long, default_value = "100")]
    pub chunk_overlap: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl CreateCommand {
    pub async fn execute(&self, config: &AppConfig, cancel: &Cancellation) -> AppResult<()> {
        tracing::info!("Executing create command for dataset '{}'", self.dataset);
        tracing::debug!("Create options: {:?}", self);

        let documents = match (&self.file, &self.path) {
            (Some(file), _) => load_jsonl(file)?,
            (None, Some(dir)) => load_directory(
                dir,
                &self.dataset,
                ChunkConfig {
                    chunk_size: self.chunk_size,
                    overlap: self.chunk_overlap,
                },
            )?,
            (None, None) => {
                return Err(AppError::Config(
                    "either --file or --path is required".to_string(),
                ))
            }
        };

        if documents.is_empty() {
            return Err(AppError::Config("no documents to index".to_string()));
        }

        let mut manager = IndexManager::from_config(config).await?;
        if !self.json {
            let print = |event: ProgressEvent| eprintln!("{}", event.format_simple());
            manager = manager.with_progress(ProgressReporter::new(Arc::new(print)));
        }

        let index = manager.dataset(&self.dataset).await?;
        let handle = index.create(documents, self.policy, cancel).await?;

        if self.json {
            super::print_json(&handle)?;
        } else {
            println!(
                "Indexed {} documents for '{}' into {} ({}) in {:.2}s",
                handle.documents_indexed,
                handle.dataset_id,
                handle.descriptor.index_name,
                handle.descriptor.backend_type,
                handle.duration_secs
            );
        }

        Ok(())
    }
}
