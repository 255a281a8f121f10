//! Error types for docindex.
//!
//! One unified enum covers every failure the indexing core can surface:
//! backend connectivity, credentials, transient timeouts, embedding
//! failures, missing index descriptors, lock contention and cancellation,
//! plus the configuration, I/O and serialization plumbing around them.

use thiserror::Error;

/// Unified error type for docindex.
///
/// All fallible functions return `Result<T, AppError>`.
/// Nothing panics outside tests; errors are represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Backend endpoint unreachable. Fatal for the calling operation.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend rejected the presented credential.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Transient network timeout; the only class the retry layer retries.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Embedding provider failure for the listed documents.
    #[error("Embedding error: {message} (documents: {})", .documents.join(", "))]
    Embedding {
        message: String,
        documents: Vec<String>,
    },

    /// Index descriptor absent for a dataset expected to be indexed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another writer holds the dataset lock.
    #[error("Dataset '{dataset_id}' is locked by another operation")]
    LockContention { dataset_id: String },

    /// Caller deadline expired or the operation was cancelled.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Backend lacks a capability the index requires.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Malformed metadata filter.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Dataset identifier cannot be turned into a backend-safe index name.
    #[error("Invalid dataset id '{0}'")]
    InvalidDatasetId(String),

    /// A failed create could not be rolled back; backend state is partial.
    #[error("Partial create for dataset '{dataset_id}': {message}")]
    PartialCreate { dataset_id: String, message: String },

    /// Random session identifiers kept colliding.
    #[error("Session id generation exhausted after {0} attempts")]
    SessionExhausted(u32),

    /// Index lifecycle errors (also wraps exhausted timeouts).
    #[error("Index error: {0}")]
    Index(String),

    /// Non-transient rejection reported by the backend.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether the retry layer may retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Timeout(_))
    }

    /// Build an embedding error naming the documents of the failing batch.
    pub fn embedding(message: impl Into<String>, documents: Vec<String>) -> Self {
        AppError::Embedding {
            message: message.into(),
            documents,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
