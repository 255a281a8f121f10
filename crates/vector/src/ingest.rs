//! Loading documents to index from disk.
//!
//! Two layouts are understood: a JSONL file with one document per line, and
//! a directory tree of text files, one source document per file, chunked
//! with [`chunk_document`].

use crate::chunker::{chunk_document, ChunkConfig};
use crate::types::{Document, DOCUMENT_ID_KEY};
use docindex_core::{AppError, AppResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// One JSONL line. `document_id` may sit at the top level or in `metadata`.
#[derive(Debug, Deserialize)]
struct JsonlRecord {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Read documents from a JSONL file.
pub fn load_jsonl(path: &Path) -> AppResult<Vec<Document>> {
    let content = fs::read_to_string(path).map_err(|e| {
        AppError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {:?}: {}", path, e),
        ))
    })?;

    let mut documents = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let record: JsonlRecord = serde_json::from_str(line).map_err(|e| {
            AppError::Serialization(format!("{:?} line {}: {}", path, number + 1, e))
        })?;

        let mut metadata = record.metadata;
        if let Some(document_id) = record.document_id {
            metadata.insert(DOCUMENT_ID_KEY.to_string(), Value::String(document_id));
        }

        documents.push(Document {
            id: record.id,
            text: record.text,
            metadata,
        });
    }

    tracing::debug!("Loaded {} documents from {:?}", documents.len(), path);
    Ok(documents)
}

/// Read and chunk every text file under `dir`.
///
/// Hidden entries are skipped, as are files that are not valid UTF-8. The
/// document id of a file is its path relative to `dir` with `/` separators.
pub fn load_directory(dir: &Path, dataset_id: &str, config: ChunkConfig) -> AppResult<Vec<Document>> {
    if !dir.is_dir() {
        return Err(AppError::Config(format!("{:?} is not a directory", dir)));
    }

    let mut documents = Vec::new();
    let mut files = 0usize;

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name().to_str()));

    for entry in walker {
        let entry = entry.map_err(|e| AppError::Other(format!("Failed to walk {:?}: {}", dir, e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let bytes = fs::read(path)?;
        let text = match String::from_utf8(bytes) {
            Ok(text) if is_likely_text(&text) => text,
            _ => {
                tracing::warn!("Skipping non-text file: {:?}", path);
                continue;
            }
        };

        let relative = path.strip_prefix(dir).unwrap_or(path);
        let document_id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        documents.extend(chunk_document(dataset_id, &document_id, &text, config));
        files += 1;
    }

    tracing::debug!(
        "Loaded {} chunks from {} files under {:?}",
        documents.len(),
        files,
        dir
    );
    Ok(documents)
}

fn is_hidden(name: Option<&str>) -> bool {
    name.map(|n| n.starts_with('.')).unwrap_or(false)
}

/// Heuristic: fewer than 10% control characters.
fn is_likely_text(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return true;
    }
    let control = text
        .chars()
        .filter(|c| c.is_control() && !c.is_whitespace())
        .count();
    control * 10 < total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_jsonl() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("docs.jsonl");
        fs::write(
            &path,
            r#"{"text": "a", "document_id": "doc1"}

{"id": "x-1", "text": "b", "metadata": {"document_id": "doc2", "page": 4}}
"#,
        )
        .unwrap();

        let docs = load_jsonl(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].document_id(), Some("doc1"));
        assert_eq!(docs[1].id.as_deref(), Some("x-1"));
        assert_eq!(docs[1].document_id(), Some("doc2"));
        assert_eq!(docs[1].metadata["page"], 4);
    }

    #[test]
    fn test_load_jsonl_reports_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.jsonl");
        fs::write(&path, "{\"text\": \"ok\"}\nnot json\n").unwrap();

        let err = load_jsonl(&path).unwrap_err().to_string();
        assert!(err.contains("line 2"));
    }

    #[test]
    fn test_load_directory() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("sub")).unwrap();
        fs::create_dir_all(temp.path().join(".git")).unwrap();
        fs::write(temp.path().join("a.txt"), "alpha text").unwrap();
        fs::write(temp.path().join("sub").join("b.md"), "beta text").unwrap();
        fs::write(temp.path().join(".git").join("HEAD"), "ref").unwrap();
        fs::write(temp.path().join("blob.bin"), [0u8, 159, 146, 150]).unwrap();

        let docs = load_directory(temp.path(), "ds-1", ChunkConfig::default()).unwrap();
        let ids: Vec<&str> = docs.iter().filter_map(|d| d.document_id()).collect();
        assert_eq!(ids, vec!["a.txt", "sub/b.md"]);
        assert_eq!(docs[0].metadata["dataset_id"], "ds-1");
    }

    #[test]
    fn test_load_directory_requires_directory() {
        let temp = TempDir::new().unwrap();
        assert!(load_directory(&temp.path().join("missing"), "ds", ChunkConfig::default()).is_err());
    }
}
