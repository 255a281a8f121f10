//! SQLite-backed vector store.
//!
//! One table per collection holding the chunk text, a little-endian `f32`
//! embedding blob and the metadata as JSON. Each upsert batch runs in one
//! transaction. Filters compile to SQL: `document_id` has its own indexed
//! column, other fields go through `json_extract`. Search is an exact
//! cosine scan over the filtered rows.

use super::{
    cosine_similarity, rank_hits, Capabilities, FilterSupport, SearchHit, VectorBackend,
    VectorRecord,
};
use crate::filter::{Filter, FilterValue};
use crate::naming::is_safe_collection_name;
use crate::types::{BackendType, DOCUMENT_ID_KEY};
use async_trait::async_trait;
use docindex_core::{AppError, AppResult};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite vector store; clones share one connection.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("location", &self.location)
            .finish()
    }
}

impl SqliteBackend {
    /// Open (or create) the database at `location`; `:memory:` keeps it in RAM.
    pub fn open(location: &str) -> AppResult<Self> {
        let conn = if location == ":memory:" {
            Connection::open_in_memory()
        } else {
            let path = Path::new(location);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AppError::Connection(format!(
                            "Failed to create sqlite directory {:?}: {}",
                            parent, e
                        ))
                    })?;
                }
            }
            Connection::open(path)
        }
        .map_err(|e| AppError::Connection(format!("Failed to open sqlite at {}: {}", location, e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimensions INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| AppError::Backend(format!("Failed to create catalog table: {}", e)))?;

        tracing::debug!("Opened sqlite vector store at {}", location);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: location.to_string(),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::Backend("sqlite connection poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AppError::Backend(format!("sqlite task failed: {}", e)))?
    }
}

fn checked(collection: &str) -> AppResult<String> {
    if !is_safe_collection_name(collection) {
        return Err(AppError::Backend(format!(
            "unsafe collection name '{}'",
            collection
        )));
    }
    Ok(collection.to_string())
}

fn sql_err(context: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| AppError::Backend(format!("{}: {}", context, e))
}

fn collection_dimensions(conn: &Connection, collection: &str) -> AppResult<Option<usize>> {
    conn.query_row(
        "SELECT dimensions FROM collections WHERE name = ?1",
        params![collection],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|d| d.map(|d| d as usize))
    .map_err(sql_err("Failed to read collection catalog"))
}

/// Compile a filter into a WHERE fragment plus its parameters.
fn compile_filter(filter: &Filter, params: &mut Vec<SqlValue>) -> AppResult<String> {
    filter.validate()?;
    match filter {
        Filter::Eq { field, value } => {
            let column = if field == DOCUMENT_ID_KEY {
                // The document_id column only ever holds text.
                if !matches!(value, FilterValue::Text(_)) {
                    return Ok("0".to_string());
                }
                "document_id".to_string()
            } else {
                format!("json_extract(metadata, '$.{}')", field)
            };
            params.push(match value {
                FilterValue::Text(s) => SqlValue::Text(s.clone()),
                FilterValue::Number(n) => SqlValue::Real(*n),
                FilterValue::Bool(b) => SqlValue::Integer(*b as i64),
            });
            Ok(format!("{} = ?", column))
        }
        Filter::And(filters) => {
            let parts = filters
                .iter()
                .map(|f| compile_filter(f, params))
                .collect::<AppResult<Vec<_>>>()?;
            Ok(format!("({})", parts.join(" AND ")))
        }
    }
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Backend(
            "Invalid embedding bytes length".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[async_trait]
impl VectorBackend for SqliteBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            filtering: FilterSupport::Native,
            transactional_batches: true,
            requires_unique_ids: false,
            uuid_ids: false,
        }
    }

    async fn collection_exists(&self, collection: &str) -> AppResult<bool> {
        let collection = checked(collection)?;
        self.with_conn(move |conn| Ok(collection_dimensions(conn, &collection)?.is_some()))
            .await
    }

    async fn create_collection(&self, collection: &str, dimensions: usize) -> AppResult<()> {
        let collection = checked(collection)?;
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(sql_err("Failed to begin transaction"))?;
            tx.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS "{c}" (
                    id TEXT PRIMARY KEY,
                    document_id TEXT,
                    text TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    metadata TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS "{c}_document_id" ON "{c}"(document_id);
                "#,
                c = collection
            ))
            .map_err(sql_err("Failed to create collection table"))?;
            tx.execute(
                "INSERT OR IGNORE INTO collections (name, dimensions) VALUES (?1, ?2)",
                params![collection, dimensions as i64],
            )
            .map_err(sql_err("Failed to register collection"))?;
            tx.commit().map_err(sql_err("Failed to commit"))?;

            tracing::debug!("Created sqlite collection '{}' ({} dims)", collection, dimensions);
            Ok(())
        })
        .await
    }

    async fn drop_collection(&self, collection: &str) -> AppResult<()> {
        let collection = checked(collection)?;
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(sql_err("Failed to begin transaction"))?;
            tx.execute_batch(&format!(r#"DROP TABLE IF EXISTS "{}";"#, collection))
                .map_err(sql_err("Failed to drop collection table"))?;
            tx.execute("DELETE FROM collections WHERE name = ?1", params![collection])
                .map_err(sql_err("Failed to unregister collection"))?;
            tx.commit().map_err(sql_err("Failed to commit"))?;
            Ok(())
        })
        .await
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> AppResult<()> {
        let collection = checked(collection)?;
        let records = records.to_vec();
        self.with_conn(move |conn| {
            let dimensions = collection_dimensions(conn, &collection)?.ok_or_else(|| {
                AppError::Backend(format!("collection '{}' does not exist", collection))
            })?;

            let tx = conn
                .transaction()
                .map_err(sql_err("Failed to begin transaction"))?;
            {
                let mut stmt = tx
                    .prepare(&format!(
                        r#"INSERT OR REPLACE INTO "{}" (id, document_id, text, embedding, metadata)
                           VALUES (?1, ?2, ?3, ?4, ?5)"#,
                        collection
                    ))
                    .map_err(sql_err("Failed to prepare upsert"))?;

                for record in &records {
                    if record.vector.len() != dimensions {
                        return Err(AppError::Backend(format!(
                            "record '{}' has {} dimensions, collection '{}' expects {}",
                            record.id,
                            record.vector.len(),
                            collection,
                            dimensions
                        )));
                    }

                    let document_id = record
                        .metadata
                        .get(DOCUMENT_ID_KEY)
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    let metadata_json = serde_json::to_string(&record.metadata)?;

                    stmt.execute(params![
                        record.id,
                        document_id,
                        record.text,
                        embedding_to_bytes(&record.vector),
                        metadata_json,
                    ])
                    .map_err(sql_err("Failed to upsert record"))?;
                }
            }
            // Dropping an uncommitted transaction rolls it back, so an early
            // return above leaves no partial batch behind.
            tx.commit().map_err(sql_err("Failed to commit batch"))?;

            tracing::debug!("Upserted {} records into sqlite collection '{}'", records.len(), collection);
            Ok(())
        })
        .await
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> AppResult<usize> {
        let collection = checked(collection)?;
        let mut values = Vec::new();
        let clause = compile_filter(filter, &mut values)?;
        self.with_conn(move |conn| {
            if collection_dimensions(conn, &collection)?.is_none() {
                return Err(AppError::Backend(format!(
                    "collection '{}' does not exist",
                    collection
                )));
            }
            conn.execute(
                &format!(r#"DELETE FROM "{}" WHERE {}"#, collection, clause),
                params_from_iter(values.iter()),
            )
            .map_err(sql_err("Failed to delete records"))
        })
        .await
    }

    async fn delete_ids(&self, collection: &str, ids: &[String]) -> AppResult<()> {
        let collection = checked(collection)?;
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            if collection_dimensions(conn, &collection)?.is_none() {
                return Ok(());
            }
            let tx = conn
                .transaction()
                .map_err(sql_err("Failed to begin transaction"))?;
            {
                let mut stmt = tx
                    .prepare(&format!(r#"DELETE FROM "{}" WHERE id = ?1"#, collection))
                    .map_err(sql_err("Failed to prepare delete"))?;
                for id in &ids {
                    stmt.execute(params![id])
                        .map_err(sql_err("Failed to delete record"))?;
                }
            }
            tx.commit().map_err(sql_err("Failed to commit"))?;
            Ok(())
        })
        .await
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> AppResult<HashSet<String>> {
        let collection = checked(collection)?;
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let mut found = HashSet::new();
            if collection_dimensions(conn, &collection)?.is_none() {
                return Ok(found);
            }
            let mut stmt = conn
                .prepare(&format!(r#"SELECT 1 FROM "{}" WHERE id = ?1"#, collection))
                .map_err(sql_err("Failed to prepare lookup"))?;
            for id in ids {
                let exists = stmt
                    .exists(params![id])
                    .map_err(sql_err("Failed to look up id"))?;
                if exists {
                    found.insert(id);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> AppResult<Vec<SearchHit>> {
        let collection = checked(collection)?;
        let mut values = Vec::new();
        let clause = match filter {
            Some(f) => compile_filter(f, &mut values)?,
            None => "1".to_string(),
        };
        let query = vector.to_vec();

        self.with_conn(move |conn| {
            if collection_dimensions(conn, &collection)?.is_none() {
                return Err(AppError::Backend(format!(
                    "collection '{}' does not exist",
                    collection
                )));
            }

            let mut stmt = conn
                .prepare(&format!(
                    r#"SELECT id, text, embedding, metadata FROM "{}" WHERE {}"#,
                    collection, clause
                ))
                .map_err(sql_err("Failed to prepare search"))?;

            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(sql_err("Failed to run search"))?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, text, embedding_bytes, metadata_json) =
                    row.map_err(sql_err("Failed to read row"))?;
                let embedding = bytes_to_embedding(&embedding_bytes)?;
                let metadata = serde_json::from_str(&metadata_json)?;
                hits.push(SearchHit {
                    score: cosine_similarity(&query, &embedding),
                    id,
                    text,
                    metadata,
                });
            }

            rank_hits(&mut hits);
            hits.truncate(top_k);

            tracing::debug!(
                "Retrieved {} records from '{}' (requested top-{})",
                hits.len(),
                collection,
                top_k
            );
            Ok(hits)
        })
        .await
    }

    async fn count(&self, collection: &str) -> AppResult<usize> {
        let collection = checked(collection)?;
        self.with_conn(move |conn| {
            if collection_dimensions(conn, &collection)?.is_none() {
                return Ok(0);
            }
            conn.query_row(
                &format!(r#"SELECT COUNT(*) FROM "{}""#, collection),
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(sql_err("Failed to count records"))
        })
        .await
    }
}
