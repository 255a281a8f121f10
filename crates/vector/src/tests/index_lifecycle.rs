use super::{ds1_documents, texts, Harness, LetterEmbedder};
use crate::backend::VectorBackend;
use crate::cancel::Cancellation;
use crate::connector::Connector;
use crate::embeddings::EmbeddingProvider;
use crate::filter::Filter;
use crate::manager::IndexManager;
use crate::registry::{DescriptorStore, MemoryDescriptorStore};
use crate::types::{BackendType, CreatePolicy, Document, DATASET_ID_KEY, DOC_ID_KEY};
use crate::vector_index::VectorIndex;
use docindex_core::{AppError, AppResult};
use std::sync::Arc;

async fn create_query_delete(harness: &Harness) {
    let index = harness.index("ds-1");
    let none = Cancellation::none();

    let handle = index
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();
    assert_eq!(handle.documents_indexed, 3);
    assert_eq!(handle.descriptor.index_name, "vector_index_ds_1_node");

    let results = index.query("a", 1, None, &none).await.unwrap();
    assert_eq!(texts(&results), vec!["a"]);

    let deleted = index.delete_by_document_id("doc1", &none).await.unwrap();
    assert_eq!(deleted, 2);

    let results = index.query("a", 3, None, &none).await.unwrap();
    assert_eq!(texts(&results), vec!["c"]);
    assert_eq!(index.count(&none).await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_query_delete_memory() {
    let (harness, _) = Harness::memory();
    create_query_delete(&harness).await;
}

#[tokio::test]
async fn test_create_query_delete_sqlite() {
    create_query_delete(&Harness::sqlite()).await;
}

#[tokio::test]
async fn test_query_results_are_ranked() {
    let (harness, _) = Harness::memory();
    let index = harness.index("ranked");
    let none = Cancellation::none();

    index
        .create(
            vec![
                Document::new("zzz", "d1"),
                Document::new("abc", "d2"),
                Document::new("aab", "d3"),
            ],
            CreatePolicy::Fail,
            &none,
        )
        .await
        .unwrap();

    let results = index.query("aa", 3, None, &none).await.unwrap();
    assert_eq!(texts(&results), vec!["aab", "abc", "zzz"]);
    assert!(results[0].score >= results[1].score);
    assert!(results[1].score >= results[2].score);
}

#[tokio::test]
async fn test_created_chunks_carry_ids() {
    let harness = Harness::sqlite();
    let index = harness.index("stamped");
    let none = Cancellation::none();

    index
        .create(
            vec![Document::new("a", "doc1").with_id("chunk-1")],
            CreatePolicy::Fail,
            &none,
        )
        .await
        .unwrap();

    let results = index.query("a", 1, None, &none).await.unwrap();
    let metadata = &results[0].document.metadata;
    assert_eq!(results[0].document.id.as_deref(), Some("chunk-1"));
    assert_eq!(metadata[DOC_ID_KEY], "chunk-1");
    assert_eq!(metadata[DATASET_ID_KEY], "stamped");
    assert_eq!(metadata["document_id"], "doc1");
}

#[tokio::test]
async fn test_delete_unknown_document_is_noop() {
    let (harness, _) = Harness::memory();
    let index = harness.index("ds-1");
    let none = Cancellation::none();
    index
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();

    assert_eq!(index.delete_by_document_id("never", &none).await.unwrap(), 0);
    assert_eq!(index.delete_by_document_id("doc2", &none).await.unwrap(), 1);
    assert_eq!(index.delete_by_document_id("doc2", &none).await.unwrap(), 0);
    assert_eq!(index.count(&none).await.unwrap(), 2);
}

#[tokio::test]
async fn test_datasets_are_isolated() {
    let harness = Harness::sqlite();
    let none = Cancellation::none();
    let first = harness.index("first");
    let second = harness.index("second");

    first
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();
    second
        .create(vec![Document::new("a", "doc1")], CreatePolicy::Fail, &none)
        .await
        .unwrap();

    second.delete_by_document_id("doc1", &none).await.unwrap();
    assert_eq!(second.count(&none).await.unwrap(), 0);
    assert_eq!(first.count(&none).await.unwrap(), 3);

    second.delete_index(&none).await.unwrap();
    assert_eq!(first.query("a", 1, None, &none).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_case_variants_cannot_share_a_collection() {
    let harness = Harness::sqlite();
    let none = Cancellation::none();
    let lower = harness.index("abc");
    lower
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();

    let upper = VectorIndex::new(
        "ABC",
        harness.backend.clone(),
        harness.batch.clone(),
        Arc::clone(&harness.embeddings),
        harness.descriptors.clone(),
        Arc::clone(&harness.locks),
    );
    assert!(matches!(upper, Err(AppError::InvalidDatasetId(_))));

    let results = lower.query("z", 10, None, &none).await.unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn test_unindexed_dataset_is_not_found() {
    let (harness, _) = Harness::memory();
    let index = harness.index("never-built");
    let none = Cancellation::none();

    assert!(matches!(
        index.query("a", 3, None, &none).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        index.delete_by_document_id("doc1", &none).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        index.delete_index(&none).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_query_with_filter() {
    let (harness, _) = Harness::memory();
    let index = harness.index("filtered");
    let none = Cancellation::none();

    index
        .create(
            vec![
                Document::new("a", "doc1").with_metadata("lang", "en"),
                Document::new("a", "doc2").with_metadata("lang", "de"),
                Document::new("b", "doc3").with_metadata("lang", "de"),
            ],
            CreatePolicy::Fail,
            &none,
        )
        .await
        .unwrap();

    let filter = Filter::eq("lang", "de");
    let results = index.query("a", 5, Some(&filter), &none).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.document.metadata["lang"] == "de"));

    let bad = Filter::eq("lang'; drop", "x");
    assert!(matches!(
        index.query("a", 5, Some(&bad), &none).await,
        Err(AppError::InvalidFilter(_))
    ));

    assert!(index.query("a", 0, None, &none).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_policies() {
    let (harness, _) = Harness::memory();
    let index = harness.index("policies");
    let none = Cancellation::none();

    index
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();

    assert!(matches!(
        index.create(ds1_documents(), CreatePolicy::Fail, &none).await,
        Err(AppError::Index(_))
    ));
    assert_eq!(index.count(&none).await.unwrap(), 3);

    index
        .create(vec![Document::new("d", "doc3")], CreatePolicy::Append, &none)
        .await
        .unwrap();
    assert_eq!(index.count(&none).await.unwrap(), 4);

    index
        .create(vec![Document::new("e", "doc4")], CreatePolicy::Overwrite, &none)
        .await
        .unwrap();
    assert_eq!(index.count(&none).await.unwrap(), 1);
    let results = index.query("e", 5, None, &none).await.unwrap();
    assert_eq!(texts(&results), vec!["e"]);
}

#[tokio::test]
async fn test_delete_index_forgets_descriptor() {
    let (harness, memory) = Harness::memory();
    let index = harness.index("dropped");
    let none = Cancellation::none();

    index
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();
    assert!(harness.descriptors.load("dropped").unwrap().is_some());

    index.delete_index(&none).await.unwrap();
    assert!(harness.descriptors.load("dropped").unwrap().is_none());
    assert!(!memory.collection_exists(index.index_name()).await.unwrap());

    // The dataset can be built again from scratch.
    index
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();
}

#[derive(Debug)]
struct WideEmbedder;

#[async_trait::async_trait]
impl EmbeddingProvider for WideEmbedder {
    fn provider_name(&self) -> &str {
        "wide"
    }

    fn model_name(&self) -> &str {
        "wide-v1"
    }

    fn dimensions(&self) -> usize {
        64
    }

    async fn embed_many(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; 64]).collect())
    }
}

#[tokio::test]
async fn test_refuses_mismatched_embedding() {
    let (mut harness, _) = Harness::memory();
    let none = Cancellation::none();
    harness
        .index("mixed")
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();

    harness.embeddings = Arc::new(WideEmbedder);
    let index = harness.index("mixed");
    assert!(matches!(
        index.query("a", 1, None, &none).await,
        Err(AppError::Index(_))
    ));
    assert!(matches!(
        index
            .create(vec![Document::new("x", "doc9")], CreatePolicy::Append, &none)
            .await,
        Err(AppError::Index(_))
    ));
}

#[tokio::test]
async fn test_manager_reopens_dataset_from_descriptor() {
    let descriptors = Arc::new(MemoryDescriptorStore::new());
    let manager = IndexManager::new(
        Connector::new("."),
        Arc::new(LetterEmbedder),
        descriptors.clone(),
        BackendType::Memory,
    );
    let none = Cancellation::none();

    assert!(manager.descriptor("ds-1").unwrap().is_none());
    manager
        .dataset("ds-1")
        .await
        .unwrap()
        .create(ds1_documents(), CreatePolicy::Fail, &none)
        .await
        .unwrap();

    let descriptor = manager.descriptor("ds-1").unwrap().unwrap();
    assert_eq!(descriptor.backend_type, BackendType::Memory);
    assert_eq!(descriptor.dimensions(), Some(26));

    let reopened = manager.dataset("ds-1").await.unwrap();
    let results = reopened.query("b", 1, None, &none).await.unwrap();
    assert_eq!(texts(&results), vec!["b"]);

    assert!(matches!(
        manager.dataset("bad id!").await,
        Err(AppError::InvalidDatasetId(_))
    ));
}
