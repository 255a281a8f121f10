//! Delete-document and drop command handlers.

use clap::Args;
use docindex_core::{AppConfig, AppResult};
use docindex_vector::{Cancellation, IndexManager};

/// Remove every chunk of one source document
#[derive(Args, Debug)]
pub struct DeleteDocumentCommand {
    /// Dataset identifier
    pub dataset: String,

    /// Source document identifier
    pub document_id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl DeleteDocumentCommand {
    pub async fn execute(&self, config: &AppConfig, cancel: &Cancellation) -> AppResult<()> {
        tracing::info!(
            "Executing delete-document command for '{}' in dataset '{}'",
            self.document_id,
            self.dataset
        );

        let manager = IndexManager::from_config(config).await?;
        let index = manager.dataset(&self.dataset).await?;
        let deleted = index.delete_by_document_id(&self.document_id, cancel).await?;

        if self.json {
            super::print_json(&serde_json::json!({
                "dataset": self.dataset,
                "documentId": self.document_id,
                "deleted": deleted,
            }))?;
        } else {
            println!(
                "Deleted {} chunks of '{}' from '{}'",
                deleted, self.document_id, self.dataset
            );
        }

        Ok(())
    }
}

/// Drop a dataset's index
#[derive(Args, Debug)]
pub struct DropCommand {
    /// Dataset identifier
    pub dataset: String,
}

impl DropCommand {
    pub async fn execute(&self, config: &AppConfig, cancel: &Cancellation) -> AppResult<()> {
        tracing::info!("Executing drop command for dataset '{}'", self.dataset);

        let manager = IndexManager::from_config(config).await?;
        let index = manager.dataset(&self.dataset).await?;
        index.delete_index(cancel).await?;

        println!("Index of '{}' dropped", self.dataset);
        Ok(())
    }
}
