//! Pluggable document indexing over interchangeable vector stores.
//!
//! Documents are embedded, written in batches to a backend collection named
//! after their dataset, and recorded in a persisted [`IndexDescriptor`] so
//! later queries and deletes reconnect to the same collection.
//!
//! - [`naming`]: dataset id to collection name
//! - [`connector`] and [`backend`]: Weaviate, SQLite and in-memory stores
//! - [`vector_index`]: create, query, delete-by-document and drop
//! - [`manager`]: wiring from [`docindex_core::AppConfig`]

pub mod backend;
pub mod batch;
pub mod cancel;
pub mod chunker;
pub mod connector;
pub mod embeddings;
pub mod filter;
pub mod ingest;
pub mod lock;
pub mod manager;
pub mod naming;
pub mod progress;
pub mod registry;
pub mod session;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

pub use backend::{Backend, Capabilities, FilterSupport, VectorBackend};
pub use batch::BatchConfig;
pub use cancel::{CancelHandle, Cancellation};
pub use connector::{Connector, ConnectorConfig};
pub use embeddings::{create_provider, EmbeddingProvider};
pub use filter::{Filter, FilterValue};
pub use manager::IndexManager;
pub use naming::index_name;
pub use progress::{ProgressEvent, ProgressReporter};
pub use registry::{DescriptorStore, FileDescriptorStore, MemoryDescriptorStore};
pub use types::{
    BackendType, CreatePolicy, Document, IndexDescriptor, IndexHandle, ScoredDocument,
};
pub use vector_index::VectorIndex;
