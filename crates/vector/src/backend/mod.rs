//! Vector store backends.
//!
//! Every backend satisfies [`VectorBackend`]: batched upsert, filtered
//! delete and nearest-neighbor search with optional metadata filtering.
//! The concrete set is closed; [`Backend`] selects one by
//! [`BackendType`] and forwards calls to it.

pub mod memory;
pub mod sqlite;
pub mod weaviate;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use weaviate::WeaviateBackend;

use crate::filter::Filter;
use crate::types::BackendType;
use async_trait::async_trait;
use docindex_core::{AppError, AppResult};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One chunk as written to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Map<String, Value>,
}

/// One nearest-neighbor match as returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    /// Similarity, higher is closer
    pub score: f32,
}

/// How a backend evaluates metadata filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSupport {
    /// Pushed down into the backend query language
    Native,
    /// Evaluated client-side by scanning
    Emulated,
    /// Not available
    None,
}

/// What a backend can do, checked when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub filtering: FilterSupport,
    /// A batch lands completely or not at all
    pub transactional_batches: bool,
    /// Object ids must be unique across the whole collection and are
    /// collision-checked before writing
    pub requires_unique_ids: bool,
    /// Object ids must be UUIDs
    pub uuid_ids: bool,
}

impl Capabilities {
    /// Refuse backends that cannot serve the index contract.
    pub fn ensure_supported(&self, backend: BackendType) -> AppResult<()> {
        if self.filtering == FilterSupport::None {
            return Err(AppError::Unsupported(format!(
                "backend '{}' cannot filter by metadata",
                backend
            )));
        }
        Ok(())
    }
}

/// Capability interface shared by all backends.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    fn capabilities(&self) -> Capabilities;

    async fn collection_exists(&self, collection: &str) -> AppResult<bool>;

    /// Create a collection. No-op if it already exists.
    async fn create_collection(&self, collection: &str, dimensions: usize) -> AppResult<()>;

    /// Drop a collection and all its data. No-op if it does not exist.
    async fn drop_collection(&self, collection: &str) -> AppResult<()>;

    /// Insert or replace records.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> AppResult<()>;

    /// Delete every record matching `filter`; returns how many went.
    async fn delete_where(&self, collection: &str, filter: &Filter) -> AppResult<usize>;

    /// Delete records by id. Missing ids are ignored.
    async fn delete_ids(&self, collection: &str, ids: &[String]) -> AppResult<()>;

    /// Ids among `ids` already present in the collection.
    async fn existing_ids(&self, collection: &str, ids: &[String]) -> AppResult<HashSet<String>>;

    /// Up to `top_k` records closest to `vector`, best first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> AppResult<Vec<SearchHit>>;

    async fn count(&self, collection: &str) -> AppResult<usize>;
}

/// A connected backend.
#[derive(Debug, Clone)]
pub enum Backend {
    Weaviate(WeaviateBackend),
    Sqlite(SqliteBackend),
    Memory(MemoryBackend),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $call:expr) => {
        match $self {
            Backend::Weaviate($inner) => $call,
            Backend::Sqlite($inner) => $call,
            Backend::Memory($inner) => $call,
        }
    };
}

#[async_trait]
impl VectorBackend for Backend {
    fn backend_type(&self) -> BackendType {
        dispatch!(self, b => b.backend_type())
    }

    fn capabilities(&self) -> Capabilities {
        dispatch!(self, b => b.capabilities())
    }

    async fn collection_exists(&self, collection: &str) -> AppResult<bool> {
        dispatch!(self, b => b.collection_exists(collection).await)
    }

    async fn create_collection(&self, collection: &str, dimensions: usize) -> AppResult<()> {
        dispatch!(self, b => b.create_collection(collection, dimensions).await)
    }

    async fn drop_collection(&self, collection: &str) -> AppResult<()> {
        dispatch!(self, b => b.drop_collection(collection).await)
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> AppResult<()> {
        dispatch!(self, b => b.upsert(collection, records).await)
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> AppResult<usize> {
        dispatch!(self, b => b.delete_where(collection, filter).await)
    }

    async fn delete_ids(&self, collection: &str, ids: &[String]) -> AppResult<()> {
        dispatch!(self, b => b.delete_ids(collection, ids).await)
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> AppResult<HashSet<String>> {
        dispatch!(self, b => b.existing_ids(collection, ids).await)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> AppResult<Vec<SearchHit>> {
        dispatch!(self, b => b.search(collection, vector, top_k, filter).await)
    }

    async fn count(&self, collection: &str) -> AppResult<usize> {
        dispatch!(self, b => b.count(collection).await)
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Order hits by score descending, ties by id ascending.
pub(crate) fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            text: String::new(),
            metadata: Map::new(),
            score,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.001);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_hits_breaks_ties_by_id() {
        let mut hits = vec![hit("c", 0.5), hit("b", 0.9), hit("a", 0.5)];
        rank_hits(&mut hits);
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_capabilities_require_filtering() {
        let caps = Capabilities {
            filtering: FilterSupport::None,
            transactional_batches: false,
            requires_unique_ids: false,
            uuid_ids: false,
        };
        assert!(matches!(
            caps.ensure_supported(BackendType::Memory),
            Err(AppError::Unsupported(_))
        ));

        let caps = Capabilities {
            filtering: FilterSupport::Emulated,
            ..caps
        };
        assert!(caps.ensure_supported(BackendType::Memory).is_ok());
    }
}
