//! The vector index of one dataset.
//!
//! A dataset moves from unindexed to indexed on its first successful
//! `create` and back on `delete_index`. `create` is all-or-nothing: a batch
//! that fails after its retries are spent aborts the build, whatever was
//! written is removed again, and no descriptor is saved. Builds and drops
//! hold the dataset lock exclusively; queries and document deletes share it.

use crate::backend::{rank_hits, Backend, VectorBackend, VectorRecord};
use crate::batch::{with_retries, BatchConfig, BatchController};
use crate::cancel::Cancellation;
use crate::embeddings::EmbeddingProvider;
use crate::filter::Filter;
use crate::lock::DatasetLocks;
use crate::naming::index_name;
use crate::progress::ProgressReporter;
use crate::registry::DescriptorStore;
use crate::types::{
    BackendType, CreatePolicy, Document, IndexDescriptor, IndexHandle, ScoredDocument,
    DATASET_ID_KEY, DOC_ID_KEY,
};
use docindex_core::{AppError, AppResult};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts at drawing a fresh identifier that the collection does not hold yet.
const MAX_ID_ATTEMPTS: usize = 5;

/// A document ready to be embedded and written.
#[derive(Debug, Clone)]
struct Prepared {
    id: String,
    document: Document,
}

/// Operations on the index of one dataset.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dataset_id: String,
    index_name: String,
    backend: Backend,
    batch: BatchConfig,
    embeddings: Arc<dyn EmbeddingProvider>,
    descriptors: Arc<dyn DescriptorStore>,
    locks: Arc<DatasetLocks>,
    progress: ProgressReporter,
}

fn lock_controller(controller: &Mutex<BatchController>) -> MutexGuard<'_, BatchController> {
    controller
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl VectorIndex {
    pub fn new(
        dataset_id: &str,
        backend: Backend,
        batch: BatchConfig,
        embeddings: Arc<dyn EmbeddingProvider>,
        descriptors: Arc<dyn DescriptorStore>,
        locks: Arc<DatasetLocks>,
    ) -> AppResult<Self> {
        Ok(Self {
            index_name: index_name(dataset_id)?,
            dataset_id: dataset_id.to_string(),
            backend,
            batch,
            embeddings,
            descriptors,
            locks,
            progress: ProgressReporter::noop(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    /// The persisted descriptor, if the dataset is indexed.
    pub fn descriptor(&self) -> AppResult<Option<IndexDescriptor>> {
        self.descriptors.load(&self.dataset_id)
    }

    fn require_descriptor(&self) -> AppResult<IndexDescriptor> {
        let descriptor = self.descriptor()?.ok_or_else(|| {
            AppError::NotFound(format!("dataset '{}' has no index", self.dataset_id))
        })?;
        self.check_descriptor(&descriptor)?;
        Ok(descriptor)
    }

    /// Refuse to serve an index with a backend or embedding it was not built with.
    fn check_descriptor(&self, descriptor: &IndexDescriptor) -> AppResult<()> {
        let backend = self.backend.backend_type();
        if descriptor.backend_type != backend {
            return Err(AppError::Index(format!(
                "dataset '{}' is indexed on {}, not {}",
                self.dataset_id, descriptor.backend_type, backend
            )));
        }

        if let Some(dimensions) = descriptor.dimensions() {
            if dimensions != self.embeddings.dimensions() {
                return Err(AppError::Index(format!(
                    "dataset '{}' was indexed with {}-dim vectors, provider yields {}",
                    self.dataset_id,
                    dimensions,
                    self.embeddings.dimensions()
                )));
            }
        }

        if let Some(model) = descriptor.embedding_model() {
            if model != self.embeddings.model_name() {
                return Err(AppError::Index(format!(
                    "dataset '{}' was indexed with model '{}', provider is '{}'",
                    self.dataset_id,
                    model,
                    self.embeddings.model_name()
                )));
            }
        }

        Ok(())
    }

    /// Embed and write `documents`, then persist the descriptor.
    pub async fn create(
        &self,
        documents: Vec<Document>,
        policy: CreatePolicy,
        cancel: &Cancellation,
    ) -> AppResult<IndexHandle> {
        let start = Instant::now();
        let _guard = self.locks.try_exclusive(&self.dataset_id)?;
        cancel.check("create")?;

        info!(
            "Indexing {} documents for dataset '{}' into '{}' ({}, policy {:?})",
            documents.len(),
            self.dataset_id,
            self.index_name,
            self.backend.backend_type(),
            policy
        );

        validate_documents(&documents)?;

        let existing = self.descriptors.load(&self.dataset_id)?;
        let collection_exists = cancel
            .run(
                "collection lookup",
                self.backend.collection_exists(&self.index_name),
            )
            .await?;

        let created_here = match (existing, policy) {
            (Some(_), CreatePolicy::Fail) => {
                return Err(AppError::Index(format!(
                    "dataset '{}' is already indexed; use the overwrite or append policy",
                    self.dataset_id
                )));
            }
            (Some(descriptor), CreatePolicy::Append) => {
                self.check_descriptor(&descriptor)?;
                if descriptor.index_name != self.index_name || !collection_exists {
                    return Err(AppError::Index(format!(
                        "cannot append to dataset '{}': collection '{}' is not available",
                        self.dataset_id, descriptor.index_name
                    )));
                }
                false
            }
            (Some(descriptor), CreatePolicy::Overwrite) => {
                info!("Overwriting index of dataset '{}'", self.dataset_id);
                cancel
                    .run(
                        "drop collection",
                        self.backend.drop_collection(&descriptor.index_name),
                    )
                    .await?;
                if descriptor.index_name != self.index_name {
                    self.drop_if_exists(cancel).await?;
                }
                self.descriptors.remove(&self.dataset_id)?;
                true
            }
            (None, _) => {
                if collection_exists {
                    warn!(
                        "Dropping stale collection '{}' left without a descriptor",
                        self.index_name
                    );
                    self.drop_if_exists(cancel).await?;
                }
                true
            }
        };

        if created_here {
            cancel
                .run(
                    "create collection",
                    self.backend
                        .create_collection(&self.index_name, self.embeddings.dimensions()),
                )
                .await?;
        }

        let prepared = match self.assign_ids(documents, created_here, cancel).await {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.rollback(created_here, &[], e).await),
        };

        let total = prepared.len();
        let (written, batches, dispatched) = self.write_all(prepared, cancel).await;
        if let Err(e) = written {
            return Err(self.rollback(created_here, &dispatched, e).await);
        }

        let descriptor = IndexDescriptor::new(self.backend.backend_type(), self.index_name.clone())
            .with_embedding(self.embeddings.model_name(), self.embeddings.dimensions());

        if created_here {
            if let Err(e) = self.descriptors.save(&self.dataset_id, &descriptor) {
                return Err(self.rollback(created_here, &dispatched, e).await);
            }
        }

        let duration = start.elapsed();
        info!(
            "Indexed {} documents for dataset '{}' in {} batches ({:.2}s)",
            total,
            self.dataset_id,
            batches,
            duration.as_secs_f64()
        );

        Ok(IndexHandle {
            dataset_id: self.dataset_id.clone(),
            descriptor,
            documents_indexed: total,
            batches,
            duration_secs: duration.as_secs_f64(),
        })
    }

    async fn drop_if_exists(&self, cancel: &Cancellation) -> AppResult<()> {
        cancel
            .run(
                "drop collection",
                self.backend.drop_collection(&self.index_name),
            )
            .await
    }

    /// Give every document an identifier and stamp the chunk metadata.
    async fn assign_ids(
        &self,
        documents: Vec<Document>,
        fresh_collection: bool,
        cancel: &Cancellation,
    ) -> AppResult<Vec<Prepared>> {
        let capabilities = self.backend.capabilities();

        let mut prepared = Vec::with_capacity(documents.len());
        let mut generated = Vec::new();
        let mut explicit = Vec::new();
        for document in documents {
            let id = match &document.id {
                Some(id) => {
                    if capabilities.uuid_ids && Uuid::parse_str(id).is_err() {
                        return Err(AppError::Index(format!(
                            "{} requires UUID document ids, got '{}'",
                            self.backend.backend_type(),
                            id
                        )));
                    }
                    explicit.push(id.clone());
                    id.clone()
                }
                None => {
                    generated.push(prepared.len());
                    Uuid::new_v4().to_string()
                }
            };
            prepared.push(Prepared { id, document });
        }

        // Overwriting a stored chunk could not be undone by a rollback.
        if !fresh_collection && !explicit.is_empty() {
            let taken = cancel
                .run(
                    "id collision check",
                    self.backend.existing_ids(&self.index_name, &explicit),
                )
                .await?;
            if !taken.is_empty() {
                let mut taken: Vec<String> = taken.into_iter().collect();
                taken.sort();
                return Err(AppError::Index(format!(
                    "cannot append to dataset '{}': ids already indexed: {}",
                    self.dataset_id,
                    taken.join(", ")
                )));
            }
        }

        // A fresh collection cannot hold any of the new ids yet.
        if capabilities.requires_unique_ids && !fresh_collection && !generated.is_empty() {
            let mut pending = generated;
            for attempt in 1..=MAX_ID_ATTEMPTS {
                let candidates: Vec<String> =
                    pending.iter().map(|&i| prepared[i].id.clone()).collect();
                let taken = cancel
                    .run(
                        "id collision check",
                        self.backend.existing_ids(&self.index_name, &candidates),
                    )
                    .await?;
                pending.retain(|&i| taken.contains(&prepared[i].id));
                if pending.is_empty() {
                    break;
                }
                if attempt == MAX_ID_ATTEMPTS {
                    return Err(AppError::Index(format!(
                        "could not draw unused ids for {} documents after {} attempts",
                        pending.len(),
                        MAX_ID_ATTEMPTS
                    )));
                }
                debug!("Regenerating {} colliding ids", pending.len());
                for &i in &pending {
                    prepared[i].id = Uuid::new_v4().to_string();
                }
            }
        }

        let mut seen = HashSet::with_capacity(prepared.len());
        for item in &mut prepared {
            if !seen.insert(item.id.clone()) {
                return Err(AppError::Index(format!(
                    "duplicate document id '{}' in one create call",
                    item.id
                )));
            }
            item.document
                .metadata
                .insert(DOC_ID_KEY.to_string(), Value::String(item.id.clone()));
            item.document
                .metadata
                .entry(DATASET_ID_KEY.to_string())
                .or_insert_with(|| Value::String(self.dataset_id.clone()));
        }

        Ok(prepared)
    }

    /// Dispatch batches with bounded concurrency.
    ///
    /// Returns the outcome, the number of finished batches, and every id
    /// handed to the backend (the rollback set).
    async fn write_all(
        &self,
        prepared: Vec<Prepared>,
        cancel: &Cancellation,
    ) -> (AppResult<()>, usize, Vec<String>) {
        let total = prepared.len() as u64;
        let controller = Mutex::new(BatchController::new(self.batch.clone()));
        let embedded = AtomicU64::new(0);
        let mut queue: VecDeque<Prepared> = prepared.into();
        let mut in_flight = FuturesUnordered::new();
        let mut dispatched = Vec::new();
        let mut written = 0u64;
        let mut batches = 0usize;

        loop {
            let (limit, size) = {
                let c = lock_controller(&controller);
                (c.in_flight_limit(), c.batch_size())
            };

            while in_flight.len() < limit && !queue.is_empty() {
                let batch: Vec<Prepared> = queue.drain(..size.min(queue.len())).collect();
                dispatched.extend(batch.iter().map(|p| p.id.clone()));
                in_flight.push(self.write_batch(batch, &controller, &embedded, total, cancel));
            }

            match in_flight.next().await {
                Some(Ok(count)) => {
                    written += count as u64;
                    batches += 1;
                    self.progress.index(written, total, &self.index_name);
                }
                Some(Err(e)) => {
                    // Let sibling batches settle so the rollback sees every write.
                    while in_flight.next().await.is_some() {}
                    return (Err(e), batches, dispatched);
                }
                None => break,
            }
        }

        (Ok(()), batches, dispatched)
    }

    async fn write_batch(
        &self,
        batch: Vec<Prepared>,
        controller: &Mutex<BatchController>,
        embedded: &AtomicU64,
        total: u64,
        cancel: &Cancellation,
    ) -> AppResult<usize> {
        let ids: Vec<String> = batch.iter().map(|p| p.id.clone()).collect();
        let texts: Vec<String> = batch.iter().map(|p| p.document.text.clone()).collect();

        let vectors = cancel
            .run("embedding", self.embeddings.embed_many(&texts))
            .await
            .map_err(|e| match e {
                AppError::Cancelled(_) => e,
                AppError::Embedding { message, .. } => AppError::embedding(message, ids.clone()),
                other => AppError::embedding(other.to_string(), ids.clone()),
            })?;

        if vectors.len() != batch.len() {
            return Err(AppError::embedding(
                format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                ),
                ids,
            ));
        }

        let done = embedded.fetch_add(vectors.len() as u64, Ordering::Relaxed) + vectors.len() as u64;
        self.progress.embed(done, total, self.embeddings.model_name());

        let dimensions = self.embeddings.dimensions();
        let mut records = Vec::with_capacity(batch.len());
        for (prepared, vector) in batch.into_iter().zip(vectors) {
            if vector.len() != dimensions {
                return Err(AppError::embedding(
                    format!("expected {} dimensions, got {}", dimensions, vector.len()),
                    vec![prepared.id],
                ));
            }
            records.push(VectorRecord {
                id: prepared.id,
                vector,
                text: prepared.document.text,
                metadata: prepared.document.metadata,
            });
        }

        let started = Instant::now();
        with_retries(
            &format!("upsert into '{}'", self.index_name),
            self.batch.timeout_retries,
            self.batch.retry_backoff,
            || lock_controller(controller).on_timeout(),
            || cancel.run("upsert", self.backend.upsert(&self.index_name, &records)),
        )
        .await?;
        lock_controller(controller).on_success(started.elapsed());

        debug!("Wrote batch of {} records to '{}'", records.len(), self.index_name);
        Ok(records.len())
    }

    /// Undo a failed create and return the error to surface.
    ///
    /// Runs without the caller's cancellation so an expired deadline does
    /// not also abort the cleanup.
    async fn rollback(&self, created_here: bool, ids: &[String], cause: AppError) -> AppError {
        self.progress.rollback(ids.len() as u64, &cause.to_string());
        warn!(
            "Create failed for dataset '{}', rolling back: {}",
            self.dataset_id, cause
        );

        let undo = if created_here {
            self.backend.drop_collection(&self.index_name).await
        } else {
            self.backend.delete_ids(&self.index_name, ids).await
        };

        match undo {
            Ok(()) => cause,
            Err(e) => AppError::PartialCreate {
                dataset_id: self.dataset_id.clone(),
                message: format!("{}; rollback failed: {}", cause, e),
            },
        }
    }

    /// Up to `top_k` chunks closest to `text`, best first.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&Filter>,
        cancel: &Cancellation,
    ) -> AppResult<Vec<ScoredDocument>> {
        let _guard = self.locks.shared(&self.dataset_id, cancel).await?;
        let descriptor = self.require_descriptor()?;

        if let Some(filter) = filter {
            filter.validate()?;
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = cancel
            .run("embedding query", self.embeddings.embed(text))
            .await?;

        let mut hits = with_retries(
            &format!("search in '{}'", descriptor.index_name),
            self.batch.timeout_retries,
            self.batch.retry_backoff,
            || {},
            || {
                cancel.run(
                    "search",
                    self.backend
                        .search(&descriptor.index_name, &vector, top_k, filter),
                )
            },
        )
        .await?;

        rank_hits(&mut hits);
        hits.truncate(top_k);

        debug!(
            "Query on dataset '{}' returned {} results",
            self.dataset_id,
            hits.len()
        );

        Ok(hits
            .into_iter()
            .map(|hit| ScoredDocument {
                document: Document {
                    id: Some(hit.id),
                    text: hit.text,
                    metadata: hit.metadata,
                },
                score: hit.score,
            })
            .collect())
    }

    /// Delete every chunk of one source document. Unknown ids delete nothing.
    pub async fn delete_by_document_id(
        &self,
        document_id: &str,
        cancel: &Cancellation,
    ) -> AppResult<usize> {
        let _guard = self.locks.shared(&self.dataset_id, cancel).await?;
        let descriptor = self.require_descriptor()?;
        let filter = Filter::document_id(document_id);

        let deleted = with_retries(
            &format!("delete from '{}'", descriptor.index_name),
            self.batch.timeout_retries,
            self.batch.retry_backoff,
            || {},
            || {
                cancel.run(
                    "delete",
                    self.backend.delete_where(&descriptor.index_name, &filter),
                )
            },
        )
        .await?;

        info!(
            "Deleted {} chunks of document '{}' from dataset '{}'",
            deleted, document_id, self.dataset_id
        );
        Ok(deleted)
    }

    /// Drop the backend collection and forget the descriptor.
    pub async fn delete_index(&self, cancel: &Cancellation) -> AppResult<()> {
        let _guard = self.locks.try_exclusive(&self.dataset_id)?;
        let descriptor = self.descriptor()?.ok_or_else(|| {
            AppError::NotFound(format!("dataset '{}' has no index", self.dataset_id))
        })?;

        with_retries(
            &format!("drop '{}'", descriptor.index_name),
            self.batch.timeout_retries,
            self.batch.retry_backoff,
            || {},
            || {
                cancel.run(
                    "drop collection",
                    self.backend.drop_collection(&descriptor.index_name),
                )
            },
        )
        .await?;
        self.descriptors.remove(&self.dataset_id)?;

        info!("Dropped index of dataset '{}'", self.dataset_id);
        Ok(())
    }

    /// Number of chunks stored for the dataset.
    pub async fn count(&self, cancel: &Cancellation) -> AppResult<usize> {
        let _guard = self.locks.shared(&self.dataset_id, cancel).await?;
        let descriptor = self.require_descriptor()?;
        cancel
            .run("count", self.backend.count(&descriptor.index_name))
            .await
    }
}

/// Every document needs a string `document_id` and a non-empty explicit id.
fn validate_documents(documents: &[Document]) -> AppResult<()> {
    for (position, document) in documents.iter().enumerate() {
        if document.document_id().is_none() {
            return Err(AppError::Index(format!(
                "document at position {} has no string document_id",
                position
            )));
        }
        if matches!(document.id.as_deref(), Some(id) if id.trim().is_empty()) {
            return Err(AppError::Index(format!(
                "document at position {} has an empty id",
                position
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_documents() {
        assert!(validate_documents(&[Document::new("a", "doc1")]).is_ok());

        let mut missing = Document::new("a", "doc1");
        missing.metadata.remove("document_id");
        assert!(validate_documents(&[missing]).is_err());

        let mut numeric = Document::new("a", "doc1");
        numeric.metadata.insert("document_id".to_string(), json!(7));
        assert!(validate_documents(&[numeric]).is_err());

        assert!(validate_documents(&[Document::new("a", "doc1").with_id(" ")]).is_err());
    }
}
