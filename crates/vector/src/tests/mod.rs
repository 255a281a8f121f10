//! End-to-end index scenarios against the in-memory and SQLite backends.

mod index_lifecycle;

use crate::backend::{Backend, MemoryBackend, SqliteBackend};
use crate::batch::BatchConfig;
use crate::embeddings::EmbeddingProvider;
use crate::lock::DatasetLocks;
use crate::registry::MemoryDescriptorStore;
use crate::types::Document;
use crate::vector_index::VectorIndex;
use docindex_core::AppResult;
use std::sync::Arc;
use std::time::Duration;

/// Counts of the letters a-z; texts sharing letters are similar.
#[derive(Debug)]
pub(crate) struct LetterEmbedder;

pub(crate) fn letter_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; 26];
    for c in text.chars().filter(char::is_ascii_alphabetic) {
        vector[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
    }
    vector
}

#[async_trait::async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn provider_name(&self) -> &str {
        "letters"
    }

    fn model_name(&self) -> &str {
        "letters-v1"
    }

    fn dimensions(&self) -> usize {
        26
    }

    async fn embed_many(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| letter_vector(t)).collect())
    }
}

pub(crate) fn test_batch() -> BatchConfig {
    BatchConfig {
        batch_size: 2,
        max_in_flight: 2,
        timeout_retries: 2,
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

/// Shared state several index handles can be built from.
pub(crate) struct Harness {
    pub backend: Backend,
    pub descriptors: Arc<MemoryDescriptorStore>,
    pub locks: Arc<DatasetLocks>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub batch: BatchConfig,
}

impl Harness {
    pub fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            descriptors: Arc::new(MemoryDescriptorStore::new()),
            locks: Arc::new(DatasetLocks::new()),
            embeddings: Arc::new(LetterEmbedder),
            batch: test_batch(),
        }
    }

    /// In-memory harness plus a handle on the backend for fault injection.
    pub fn memory() -> (Self, MemoryBackend) {
        let memory = MemoryBackend::new();
        (Self::with_backend(Backend::Memory(memory.clone())), memory)
    }

    pub fn sqlite() -> Self {
        let sqlite = SqliteBackend::open(":memory:").unwrap();
        Self::with_backend(Backend::Sqlite(sqlite))
    }

    pub fn index(&self, dataset_id: &str) -> VectorIndex {
        VectorIndex::new(
            dataset_id,
            self.backend.clone(),
            self.batch.clone(),
            Arc::clone(&self.embeddings),
            self.descriptors.clone(),
            Arc::clone(&self.locks),
        )
        .unwrap()
    }
}

/// The three documents of the ds-1 scenario.
pub(crate) fn ds1_documents() -> Vec<Document> {
    vec![
        Document::new("a", "doc1"),
        Document::new("b", "doc1"),
        Document::new("c", "doc2"),
    ]
}

pub(crate) fn texts(results: &[crate::types::ScoredDocument]) -> Vec<&str> {
    results.iter().map(|r| r.document.text.as_str()).collect()
}
