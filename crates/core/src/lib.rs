//! docindex core library
//!
//! Foundational pieces shared by the indexing crate and the CLI:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging setup
//! - Layered configuration

pub mod config;
pub mod error;
pub mod logging;

pub use config::{AppConfig, BackendSettings, EmbeddingSettings, IndexSettings};
pub use error::{AppError, AppResult};
