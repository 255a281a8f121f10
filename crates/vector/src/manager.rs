//! Entry point tying configuration to per-dataset indexes.
//!
//! The manager owns what every dataset shares: the connector pool, the
//! embedding provider, the descriptor store and the lock table. `dataset`
//! reconstructs a [`VectorIndex`] from the persisted descriptor, falling
//! back to the default backend for datasets that are not indexed yet.

use crate::connector::Connector;
use crate::embeddings::{create_provider, EmbeddingProvider};
use crate::lock::DatasetLocks;
use crate::naming::validate_dataset_id;
use crate::progress::ProgressReporter;
use crate::registry::{DescriptorStore, FileDescriptorStore};
use crate::types::{BackendType, IndexDescriptor};
use crate::vector_index::VectorIndex;
use docindex_core::{AppConfig, AppResult};
use std::sync::Arc;

#[derive(Debug)]
pub struct IndexManager {
    connector: Connector,
    embeddings: Arc<dyn EmbeddingProvider>,
    descriptors: Arc<dyn DescriptorStore>,
    locks: Arc<DatasetLocks>,
    default_backend: BackendType,
    progress: ProgressReporter,
}

impl IndexManager {
    pub fn new(
        connector: Connector,
        embeddings: Arc<dyn EmbeddingProvider>,
        descriptors: Arc<dyn DescriptorStore>,
        default_backend: BackendType,
    ) -> Self {
        Self {
            connector,
            embeddings,
            descriptors,
            locks: Arc::new(DatasetLocks::new()),
            default_backend,
            progress: ProgressReporter::noop(),
        }
    }

    /// Build everything from application configuration.
    pub async fn from_config(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;
        config.ensure_docindex_dir()?;

        let embeddings = create_provider(&config.index.embedding).await?;
        let descriptors: Arc<dyn DescriptorStore> =
            Arc::new(FileDescriptorStore::new(config.descriptor_dir()));
        let default_backend = config.index.default_backend.parse()?;

        tracing::debug!(
            "Index manager: backend={}, embeddings={}/{} ({} dims), descriptors={:?}",
            default_backend,
            embeddings.provider_name(),
            embeddings.model_name(),
            embeddings.dimensions(),
            config.descriptor_dir()
        );

        Ok(Self::new(
            Connector::from_app_config(config),
            embeddings,
            descriptors,
            default_backend,
        )
        .with_locks(DatasetLocks::with_lock_dir(
            config.docindex_dir().join("locks"),
        )))
    }

    pub fn with_locks(mut self, locks: DatasetLocks) -> Self {
        self.locks = Arc::new(locks);
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn default_backend(&self) -> BackendType {
        self.default_backend
    }

    pub fn embeddings(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embeddings
    }

    /// Persisted descriptor of a dataset, if indexed.
    pub fn descriptor(&self, dataset_id: &str) -> AppResult<Option<IndexDescriptor>> {
        validate_dataset_id(dataset_id)?;
        self.descriptors.load(dataset_id)
    }

    /// Index handle for a dataset, connected to the backend that serves it.
    pub async fn dataset(&self, dataset_id: &str) -> AppResult<VectorIndex> {
        let backend_type = match self.descriptor(dataset_id)? {
            Some(descriptor) => descriptor.backend_type,
            None => self.default_backend,
        };

        let backend = self.connector.connect(backend_type).await?;
        let batch = self.connector.config(backend_type).batch_config();

        Ok(VectorIndex::new(
            dataset_id,
            backend,
            batch,
            Arc::clone(&self.embeddings),
            Arc::clone(&self.descriptors),
            Arc::clone(&self.locks),
        )?
        .with_progress(self.progress.clone()))
    }
}
