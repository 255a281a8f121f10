//! Query command handler.

use clap::Args;
use docindex_core::{AppConfig, AppResult};
use docindex_vector::{Cancellation, Filter, IndexManager};

/// Search a dataset's index
#[derive(Args, Debug)]
pub struct QueryCommand {
    /// Dataset identifier
    pub dataset: String,

    /// Query text
    pub text: String,

    /// Number of chunks to retrieve
    #[arg(short = 'k', long, default_value = "5")]
    pub top_k: usize,

    /// Metadata equality filter (field=value); repeat to AND several
    #[arg(long = "where", value_name = "FIELD=VALUE")]
    pub filters: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryCommand {
    fn filter(&self) -> AppResult<Option<Filter>> {
        let mut filters = self
            .filters
            .iter()
            .map(|f| Filter::parse_assignment(f))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter::and(filters)),
        })
    }

    pub async fn execute(&self, config: &AppConfig, cancel: &Cancellation) -> AppResult<()> {
        tracing::info!("Executing query command for dataset '{}'", self.dataset);

        let filter = self.filter()?;
        let manager = IndexManager::from_config(config).await?;
        let index = manager.dataset(&self.dataset).await?;
        let results = index
            .query(&self.text, self.top_k, filter.as_ref(), cancel)
            .await?;

        if self.json {
            return super::print_json(&results);
        }

        if results.is_empty() {
            println!("No results.");
            return Ok(());
        }

        for (rank, result) in results.iter().enumerate() {
            let source = result
                .document
                .document_id()
                .unwrap_or("(unknown document)");
            println!("{}. [{:.3}] {}", rank + 1, result.score, source);
            println!("   {}", preview(&result.document.text, 160));
        }

        Ok(())
    }
}

/// First `max` characters on one line.
fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}...", cut)
}
