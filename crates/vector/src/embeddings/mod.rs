//! Embedding providers.
//!
//! The index treats a provider as an opaque function from text to a
//! fixed-length vector. `embed_many` preserves input order.

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};
pub use providers::ollama::OllamaProvider;
pub use providers::trigram::TrigramProvider;
