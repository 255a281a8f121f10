//! docindex CLI
//!
//! Main entry point for the docindex command-line tool.
//! Builds, queries and drops per-dataset vector indexes.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    CreateCommand, DeleteDocumentCommand, DescribeCommand, DropCommand, NameCommand, QueryCommand,
};
use docindex_core::logging::{self, LogFormat};
use docindex_core::{AppConfig, AppResult};
use docindex_vector::Cancellation;
use std::path::PathBuf;
use std::time::Duration;

/// docindex - document indexing over pluggable vector stores
#[derive(Parser, Debug)]
#[command(name = "docindex")]
#[command(about = "Document indexing over pluggable vector stores", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "DOCINDEX_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "DOCINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Backend for new indexes (weaviate, sqlite, memory)
    #[arg(short, long, global = true, env = "DOCINDEX_BACKEND")]
    backend: Option<String>,

    /// Give up after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index documents for a dataset
    Create(CreateCommand),

    /// Search a dataset's index
    Query(QueryCommand),

    /// Remove every chunk of one source document
    DeleteDocument(DeleteDocumentCommand),

    /// Drop a dataset's index
    Drop(DropCommand),

    /// Show the persisted descriptor of a dataset
    Describe(DescribeCommand),

    /// Print the collection name a dataset maps to
    Name(NameCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.workspace.clone(), cli.config.clone())?.with_overrides(
        cli.workspace,
        cli.backend,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    logging::init_logging(
        config.log_level.as_deref(),
        config.no_color,
        LogFormat::parse(&config.log_format)?,
    )?;

    tracing::info!("docindex starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Default backend: {}", config.index.default_backend);

    // Ctrl-C cancels the running operation; a create then rolls back.
    let (handle, cancel) = Cancellation::new_pair();
    let cancel = match cli.timeout {
        Some(secs) => cancel.and_deadline(tokio::time::Instant::now() + Duration::from_secs(secs)),
        None => cancel,
    };
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            handle.cancel();
        }
    });

    let command_name = match &cli.command {
        Commands::Create(_) => "create",
        Commands::Query(_) => "query",
        Commands::DeleteDocument(_) => "delete-document",
        Commands::Drop(_) => "drop",
        Commands::Describe(_) => "describe",
        Commands::Name(_) => "name",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Create(cmd) => cmd.execute(&config, &cancel).await,
        Commands::Query(cmd) => cmd.execute(&config, &cancel).await,
        Commands::DeleteDocument(cmd) => cmd.execute(&config, &cancel).await,
        Commands::Drop(cmd) => cmd.execute(&config, &cancel).await,
        Commands::Describe(cmd) => cmd.execute(&config, &cancel).await,
        Commands::Name(cmd) => cmd.execute(),
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use docindex_vector::CreatePolicy;

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from([
            "docindex",
            "--backend",
            "memory",
            "create",
            "ds-1",
            "--file",
            "docs.jsonl",
            "--policy",
            "append",
        ])
        .unwrap();

        assert_eq!(cli.backend.as_deref(), Some("memory"));
        match cli.command {
            Commands::Create(cmd) => {
                assert_eq!(cmd.dataset, "ds-1");
                assert_eq!(cmd.policy, CreatePolicy::Append);
                assert_eq!(cmd.file, Some(PathBuf::from("docs.jsonl")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_create_needs_exactly_one_source() {
        assert!(Cli::try_parse_from(["docindex", "create", "ds-1"]).is_err());
        assert!(Cli::try_parse_from([
            "docindex", "create", "ds-1", "--file", "a.jsonl", "--path", "docs"
        ])
        .is_err());
    }

    #[test]
    fn test_parse_query_filters() {
        let cli = Cli::try_parse_from([
            "docindex", "query", "ds-1", "hello", "-k", "3", "--where", "document_id=doc1",
            "--where", "page=2",
        ])
        .unwrap();

        match cli.command {
            Commands::Query(cmd) => {
                assert_eq!(cmd.top_k, 3);
                assert_eq!(cmd.filters.len(), 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
