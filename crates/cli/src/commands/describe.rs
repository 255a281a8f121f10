//! Describe and name command handlers.

use clap::Args;
use docindex_core::{AppConfig, AppError, AppResult};
use docindex_vector::{index_name, Cancellation, IndexManager};

/// Show the persisted descriptor of a dataset
#[derive(Args, Debug)]
pub struct DescribeCommand {
    /// Dataset identifier
    pub dataset: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl DescribeCommand {
    pub async fn execute(&self, config: &AppConfig, cancel: &Cancellation) -> AppResult<()> {
        tracing::info!("Executing describe command for dataset '{}'", self.dataset);

        let manager = IndexManager::from_config(config).await?;
        let descriptor = manager.descriptor(&self.dataset)?.ok_or_else(|| {
            AppError::NotFound(format!("dataset '{}' has no index", self.dataset))
        })?;
        let chunks = manager.dataset(&self.dataset).await?.count(cancel).await?;

        if self.json {
            super::print_json(&serde_json::json!({
                "dataset": self.dataset,
                "descriptor": descriptor,
                "chunks": chunks,
            }))?;
        } else {
            println!("Dataset: {}", self.dataset);
            println!("  Backend: {}", descriptor.backend_type);
            println!("  Index: {}", descriptor.index_name);
            if let Some(model) = descriptor.embedding_model() {
                println!("  Embedding model: {}", model);
            }
            if let Some(dimensions) = descriptor.dimensions() {
                println!("  Dimensions: {}", dimensions);
            }
            println!("  Chunks: {}", chunks);
        }

        Ok(())
    }
}

/// Print the collection name a dataset maps to
#[derive(Args, Debug)]
pub struct NameCommand {
    /// Dataset identifier
    pub dataset: String,
}

impl NameCommand {
    pub fn execute(&self) -> AppResult<()> {
        println!("{}", index_name(&self.dataset)?);
        Ok(())
    }
}
