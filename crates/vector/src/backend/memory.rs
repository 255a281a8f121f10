//! In-process backend.
//!
//! Collections live for as long as any clone of the backend does; the
//! connector pools one instance per process. Filtering is emulated by
//! scanning, and every batch is applied under a single write lock.

use super::{
    cosine_similarity, rank_hits, Capabilities, FilterSupport, SearchHit, VectorBackend,
    VectorRecord,
};
use crate::filter::Filter;
use crate::types::BackendType;
use async_trait::async_trait;
use docindex_core::{AppError, AppResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Collection {
    dimensions: usize,
    records: BTreeMap<String, VectorRecord>,
}

/// In-memory vector store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    #[cfg(test)]
    faults: Arc<faults::Faults>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn faults(&self) -> &faults::Faults {
        &self.faults
    }
}

fn missing(collection: &str) -> AppError {
    AppError::Backend(format!("collection '{}' does not exist", collection))
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            filtering: FilterSupport::Emulated,
            transactional_batches: true,
            requires_unique_ids: false,
            uuid_ids: false,
        }
    }

    async fn collection_exists(&self, collection: &str) -> AppResult<bool> {
        Ok(self.read().contains_key(collection))
    }

    async fn create_collection(&self, collection: &str, dimensions: usize) -> AppResult<()> {
        self.write()
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimensions,
                records: BTreeMap::new(),
            });
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> AppResult<()> {
        self.write().remove(collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> AppResult<()> {
        #[cfg(test)]
        self.faults.before_upsert().await?;

        let mut collections = self.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;

        if let Some(bad) = records.iter().find(|r| r.vector.len() != target.dimensions) {
            return Err(AppError::Backend(format!(
                "record '{}' has {} dimensions, collection '{}' expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                target.dimensions
            )));
        }

        for record in records {
            target.records.insert(record.id.clone(), record.clone());
        }

        tracing::debug!("Upserted {} records into memory collection '{}'", records.len(), collection);
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> AppResult<usize> {
        let mut collections = self.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;

        let before = target.records.len();
        target.records.retain(|_, r| !filter.matches(&r.metadata));
        Ok(before - target.records.len())
    }

    async fn delete_ids(&self, collection: &str, ids: &[String]) -> AppResult<()> {
        if let Some(target) = self.write().get_mut(collection) {
            for id in ids {
                target.records.remove(id);
            }
        }
        Ok(())
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> AppResult<HashSet<String>> {
        let collections = self.read();
        Ok(match collections.get(collection) {
            Some(target) => ids
                .iter()
                .filter(|id| target.records.contains_key(*id))
                .cloned()
                .collect(),
            None => HashSet::new(),
        })
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> AppResult<Vec<SearchHit>> {
        let collections = self.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| missing(collection))?;

        let mut hits: Vec<SearchHit> = target
            .records
            .values()
            .filter(|r| filter.map(|f| f.matches(&r.metadata)).unwrap_or(true))
            .map(|r| SearchHit {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(vector, &r.vector),
            })
            .collect();

        rank_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> AppResult<usize> {
        Ok(self
            .read()
            .get(collection)
            .map(|c| c.records.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
pub(crate) mod faults {
    //! Failure injection for exercising retry, rollback and locking paths.

    use docindex_core::{AppError, AppResult};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub(crate) struct Faults {
        upsert_calls: AtomicUsize,
        /// Upsert calls allowed to succeed before every later call times out
        fail_after: AtomicUsize,
        /// Next N upsert calls time out, then calls succeed again
        transient: AtomicUsize,
        delay_ms: AtomicU64,
    }

    impl Faults {
        pub(crate) fn time_out_after(&self, successful_calls: usize) {
            self.fail_after.store(successful_calls + 1, Ordering::SeqCst);
        }

        pub(crate) fn time_out_next(&self, calls: usize) {
            self.transient.store(calls, Ordering::SeqCst);
        }

        pub(crate) fn delay_upserts(&self, delay: Duration) {
            self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        pub(crate) fn upsert_calls(&self) -> usize {
            self.upsert_calls.load(Ordering::SeqCst)
        }

        pub(crate) async fn before_upsert(&self) -> AppResult<()> {
            let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;

            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let fail_after = self.fail_after.load(Ordering::SeqCst);
            if fail_after > 0 && call >= fail_after {
                return Err(AppError::Timeout(format!("injected timeout on call {}", call)));
            }

            let pending = self.transient.load(Ordering::SeqCst);
            if pending > 0
                && self
                    .transient
                    .compare_exchange(pending, pending - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Err(AppError::Timeout(format!("injected timeout on call {}", call)));
            }

            Ok(())
        }
    }
}
