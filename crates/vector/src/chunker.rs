//! Text chunking with configurable size and overlap.

use crate::types::{Document, DATASET_ID_KEY};
use serde_json::Value;

/// Chunk sizing in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 100,
        }
    }
}

/// One slice of a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub position: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Chunk text into overlapping segments.
///
/// Simple byte-window chunking that never splits a UTF-8 character.
/// Whitespace-only windows are dropped.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.is_empty() || chunk_size == 0 {
        return vec![];
    }

    let mut chunks = Vec::new();
    let mut position = 0u32;
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        // A single character wider than the window.
        if end == start {
            end = start + 1;
            while end < text.len() && !text.is_char_boundary(end) {
                end += 1;
            }
        }

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(TextChunk {
                position,
                start,
                end,
                text: piece.to_string(),
            });
            position += 1;
        }

        if end >= text.len() {
            break;
        }

        let step = if chunk_size > overlap {
            chunk_size - overlap
        } else {
            chunk_size
        };

        let mut next_start = start + step;
        while next_start < text.len() && !text.is_char_boundary(next_start) {
            next_start += 1;
        }
        start = next_start;
    }

    tracing::debug!(
        "Chunked text into {} chunks (size: {}, overlap: {})",
        chunks.len(),
        chunk_size,
        overlap
    );

    chunks
}

/// Chunk one source document into indexable documents.
///
/// Each chunk carries `document_id`, `dataset_id`, `position` and its byte
/// range; the chunk's own `doc_id` is stamped when it is indexed.
pub fn chunk_document(
    dataset_id: &str,
    document_id: &str,
    text: &str,
    config: ChunkConfig,
) -> Vec<Document> {
    chunk_text(text, config.chunk_size, config.overlap)
        .into_iter()
        .map(|chunk| {
            Document::new(chunk.text, document_id)
                .with_metadata(DATASET_ID_KEY, dataset_id)
                .with_metadata("position", chunk.position)
                .with_metadata("start", Value::from(chunk.start as u64))
                .with_metadata("end", Value::from(chunk.end as u64))
        })
        .collect()
}
