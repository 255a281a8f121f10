//! Command handlers for the docindex CLI.
//!
//! One submodule per group of subcommands.

pub mod create;
pub mod delete;
pub mod describe;
pub mod query;

pub use create::CreateCommand;
pub use delete::{DeleteDocumentCommand, DropCommand};
pub use describe::{DescribeCommand, NameCommand};
pub use query::QueryCommand;

use docindex_core::AppResult;
use serde::Serialize;

/// Pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    let output = serde_json::to_string_pretty(value)?;
    println!("{}", output);
    Ok(())
}
