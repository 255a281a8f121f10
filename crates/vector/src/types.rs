//! Index type definitions.

use docindex_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Metadata key linking a chunk to its parent source document.
pub const DOCUMENT_ID_KEY: &str = "document_id";

/// Metadata key carrying the chunk's own identifier.
pub const DOC_ID_KEY: &str = "doc_id";

/// Metadata key carrying the owning dataset.
pub const DATASET_ID_KEY: &str = "dataset_id";

/// A chunk of text to index, plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Externally assigned identifier; generated at create time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Text content
    pub text: String,

    /// Arbitrary metadata; must contain `document_id` to be indexed
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Create a chunk belonging to `document_id`.
    pub fn new(text: impl Into<String>, document_id: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert(DOCUMENT_ID_KEY.to_string(), Value::String(document_id.into()));
        Self {
            id: None,
            text: text.into(),
            metadata,
        }
    }

    /// Set the externally assigned identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Parent source document identifier, if present and a string.
    pub fn document_id(&self) -> Option<&str> {
        self.metadata.get(DOCUMENT_ID_KEY).and_then(|v| v.as_str())
    }
}

/// A query match with its similarity score (higher is closer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Vector-store implementations the connector can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Weaviate,
    Sqlite,
    Memory,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Weaviate => "weaviate",
            BackendType::Sqlite => "sqlite",
            BackendType::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weaviate" => Ok(BackendType::Weaviate),
            "sqlite" => Ok(BackendType::Sqlite),
            "memory" => Ok(BackendType::Memory),
            other => Err(AppError::Config(format!(
                "Unknown backend type '{}'. Supported: weaviate, sqlite, memory",
                other
            ))),
        }
    }
}

/// Persisted record of which backend and collection serve a dataset.
///
/// The single source of truth for reconstructing a connector. `index_name`
/// is derived deterministically from the dataset id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub backend_type: BackendType,
    pub index_name: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl IndexDescriptor {
    pub fn new(backend_type: BackendType, index_name: impl Into<String>) -> Self {
        Self {
            backend_type,
            index_name: index_name.into(),
            config: Map::new(),
        }
    }

    /// Record embedding parameters the index was built with.
    pub fn with_embedding(mut self, model: &str, dimensions: usize) -> Self {
        self.config
            .insert("embedding_model".to_string(), Value::String(model.to_string()));
        self.config
            .insert("dimensions".to_string(), Value::from(dimensions as u64));
        self
    }

    /// Vector dimensions recorded at create time.
    pub fn dimensions(&self) -> Option<usize> {
        self.config
            .get("dimensions")
            .and_then(|v| v.as_u64())
            .map(|d| d as usize)
    }

    /// Embedding model recorded at create time.
    pub fn embedding_model(&self) -> Option<&str> {
        self.config.get("embedding_model").and_then(|v| v.as_str())
    }

    /// Read the older `{"type": ..., "vector_store": {"class_prefix": ...}}`
    /// index struct layout.
    pub fn from_legacy_struct(value: &Value) -> AppResult<Self> {
        let backend = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::Serialization("index struct has no 'type'".to_string()))?;
        let class_prefix = value
            .get("vector_store")
            .and_then(|v| v.get("class_prefix"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AppError::Serialization("index struct has no 'vector_store.class_prefix'".to_string())
            })?;

        Ok(Self::new(backend.parse()?, class_prefix))
    }
}

/// What `create` does when the dataset already has an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatePolicy {
    /// Refuse to touch an indexed dataset.
    #[default]
    Fail,
    /// Drop the existing collection and index from scratch.
    Overwrite,
    /// Add documents to the existing collection.
    Append,
}

impl FromStr for CreatePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(CreatePolicy::Fail),
            "overwrite" => Ok(CreatePolicy::Overwrite),
            "append" => Ok(CreatePolicy::Append),
            other => Err(AppError::Config(format!(
                "Unknown create policy '{}'. Supported: fail, overwrite, append",
                other
            ))),
        }
    }
}

/// Result of a successful `create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHandle {
    pub dataset_id: String,
    pub descriptor: IndexDescriptor,
    pub documents_indexed: usize,
    pub batches: usize,
    pub duration_secs: f64,
}
