//! Weaviate backend over its REST and GraphQL APIs.
//!
//! Collections map to Weaviate classes (the index name with its first
//! letter upper-cased, as Weaviate requires). Vectors are supplied by the
//! client, so classes are created with `vectorizer: none`. Search goes
//! through GraphQL `nearVector` and the returned cosine distance is turned
//! back into a similarity.

use super::{Capabilities, FilterSupport, SearchHit, VectorBackend, VectorRecord};
use crate::connector::ConnectorConfig;
use crate::filter::{is_valid_field, Filter, FilterValue};
use crate::types::BackendType;
use async_trait::async_trait;
use docindex_core::{AppError, AppResult};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

const META_ENDPOINT: &str = "/v1/meta";
const SCHEMA_ENDPOINT: &str = "/v1/schema";
const OBJECTS_ENDPOINT: &str = "/v1/objects";
const BATCH_ENDPOINT: &str = "/v1/batch/objects";
const GRAPHQL_ENDPOINT: &str = "/v1/graphql";

/// Property holding the chunk text.
const TEXT_PROPERTY: &str = "text";

/// Weaviate client bound to one server.
#[derive(Debug, Clone)]
pub struct WeaviateBackend {
    client: Arc<Client>,
    base_url: String,
    api_key: Option<String>,
    /// Metadata properties declared on new classes and returned by search
    attributes: Vec<String>,
}

impl WeaviateBackend {
    /// Build a client and verify the server answers.
    pub async fn connect(config: &ConnectorConfig) -> AppResult<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            AppError::Config("weaviate backend requires an endpoint".to_string())
        })?;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| {
                AppError::Connection(format!("Failed to create HTTP client for Weaviate: {}", e))
            })?;

        let backend = Self {
            client: Arc::new(client),
            base_url: endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            attributes: config
                .attributes
                .iter()
                .filter(|a| is_valid_field(a) && a.as_str() != TEXT_PROPERTY)
                .cloned()
                .collect(),
        };

        backend.handshake().await?;
        Ok(backend)
    }

    #[instrument(skip(self), fields(url = %self.base_url))]
    async fn handshake(&self) -> AppResult<()> {
        let response = self
            .send(self.client.get(self.url(META_ENDPOINT)), "handshake")
            .await?;
        let meta: Value = response
            .json()
            .await
            .map_err(|e| AppError::Connection(format!("Invalid Weaviate meta response: {}", e)))?;

        let version = meta
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        debug!("Connected to Weaviate {}", version);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach credentials, send, and map transport failures.
    async fn send(&self, request: RequestBuilder, what: &str) -> AppResult<Response> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request.send().await.map_err(|e| map_send_error(e, what))?;
        check_status(response, what).await
    }

    /// Like `send`, but a 404 yields `None`.
    async fn send_optional(&self, request: RequestBuilder, what: &str) -> AppResult<Option<Response>> {
        match self.send(request, what).await {
            Ok(response) => Ok(Some(response)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn graphql(&self, query: String, what: &str) -> AppResult<Value> {
        let response = self
            .send(
                self.client
                    .post(self.url(GRAPHQL_ENDPOINT))
                    .json(&json!({ "query": query })),
                what,
            )
            .await?;
        let body: Value = response.json().await.map_err(|e| map_send_error(e, what))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(AppError::Backend(format!(
                    "{} failed: {}",
                    what,
                    join_messages(errors)
                )));
            }
        }
        Ok(body)
    }
}

/// Outcome of one `DELETE /v1/batch/objects` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeletePass {
    matches: usize,
    limit: Option<usize>,
    successful: usize,
}

impl DeletePass {
    /// More objects may match when a pass filled the limit and made progress.
    fn needs_another_pass(&self) -> bool {
        self.successful > 0 && self.limit.map(|l| self.matches >= l).unwrap_or(false)
    }
}

fn parse_delete_result(result: &Value, class: &str) -> AppResult<DeletePass> {
    let count = |field: &str| {
        result
            .pointer(&format!("/results/{}", field))
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    };

    let failed = count("failed").unwrap_or(0);
    if failed > 0 {
        return Err(AppError::Backend(format!(
            "batch delete failed for {} objects in '{}'",
            failed, class
        )));
    }

    Ok(DeletePass {
        matches: count("matches").unwrap_or(0),
        limit: count("limit"),
        successful: count("successful").unwrap_or(0),
    })
}

/// Weaviate class names must start with an upper-case letter.
pub fn class_name(collection: &str) -> String {
    let mut chars = collection.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn map_send_error(e: reqwest::Error, what: &str) -> AppError {
    // A connect timeout is a connection failure, not a retryable read timeout.
    if e.is_connect() {
        AppError::Connection(format!("{}: {}", what, e))
    } else if e.is_timeout() {
        AppError::Timeout(format!("{}: {}", what, e))
    } else {
        AppError::Backend(format!("{}: {}", what, e))
    }
}

async fn check_status(response: Response, what: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &error_message(&body), what))
}

/// Classify a non-success HTTP status.
fn status_error(status: StatusCode, message: &str, what: &str) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::Auth(format!("{} rejected ({}): {}", what, status, message))
        }
        StatusCode::NOT_FOUND => AppError::NotFound(format!("{}: {}", what, message)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            AppError::Timeout(format!("{} ({}): {}", what, status, message))
        }
        _ => AppError::Backend(format!("{} failed ({}): {}", what, status, message)),
    }
}

/// Pull the message out of a Weaviate error body, or fall back to the raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match value.get("error") {
            Some(Value::Array(errors)) => join_messages(errors),
            Some(Value::String(message)) => message.clone(),
            _ => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

fn join_messages(errors: &[Value]) -> String {
    errors
        .iter()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("; ")
}

fn class_schema(class: &str, attributes: &[String]) -> Value {
    let mut properties = vec![json!({ "name": TEXT_PROPERTY, "dataType": ["text"] })];
    properties.extend(
        attributes
            .iter()
            .map(|a| json!({ "name": a, "dataType": ["text"] })),
    );

    json!({
        "class": class,
        "vectorizer": "none",
        "vectorIndexConfig": { "distance": "cosine" },
        "properties": properties,
    })
}

fn batch_object(class: &str, record: &VectorRecord) -> Value {
    let mut properties = Map::new();
    properties.insert(TEXT_PROPERTY.to_string(), Value::String(record.text.clone()));
    for (key, value) in &record.metadata {
        if is_valid_field(key) && key != TEXT_PROPERTY {
            properties.insert(key.clone(), value.clone());
        }
    }

    json!({
        "class": class,
        "id": record.id,
        "vector": record.vector,
        "properties": properties,
    })
}

/// Errors reported per object in a batch response.
fn batch_errors(response: &Value) -> Vec<String> {
    response
        .as_array()
        .map(|objects| {
            objects
                .iter()
                .filter_map(|object| {
                    let errors = object
                        .pointer("/result/errors/error")
                        .and_then(Value::as_array)?;
                    let id = object.get("id").and_then(Value::as_str).unwrap_or("?");
                    Some(format!("{}: {}", id, join_messages(errors)))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// REST `where` clause.
fn rest_where(filter: &Filter) -> Value {
    match filter {
        Filter::Eq { field, value } => {
            let mut clause = json!({ "path": [field], "operator": "Equal" });
            let (key, value) = match value {
                FilterValue::Text(s) => ("valueText", json!(s)),
                FilterValue::Number(n) => ("valueNumber", json!(n)),
                FilterValue::Bool(b) => ("valueBoolean", json!(b)),
            };
            clause[key] = value;
            clause
        }
        Filter::And(filters) => json!({
            "operator": "And",
            "operands": filters.iter().map(rest_where).collect::<Vec<_>>(),
        }),
    }
}

/// GraphQL `where` argument. Field names are validated identifiers and
/// text values are JSON-escaped, which is valid GraphQL string syntax.
fn graphql_where(filter: &Filter) -> String {
    match filter {
        Filter::Eq { field, value } => {
            let value = match value {
                FilterValue::Text(s) => format!("valueText: {}", json!(s)),
                FilterValue::Number(n) => format!("valueNumber: {}", json!(n)),
                FilterValue::Bool(b) => format!("valueBoolean: {}", b),
            };
            format!("{{path: [\"{}\"], operator: Equal, {}}}", field, value)
        }
        Filter::And(filters) => format!(
            "{{operator: And, operands: [{}]}}",
            filters
                .iter()
                .map(graphql_where)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn search_query(
    class: &str,
    vector: &[f32],
    top_k: usize,
    filter: Option<&Filter>,
    attributes: &[String],
) -> String {
    let mut arguments = format!(
        "nearVector: {{vector: {}}}, limit: {}",
        json!(vector),
        top_k
    );
    if let Some(filter) = filter {
        arguments.push_str(&format!(", where: {}", graphql_where(filter)));
    }

    let mut fields = vec![TEXT_PROPERTY.to_string()];
    fields.extend(attributes.iter().cloned());

    format!(
        "{{ Get {{ {}({}) {{ {} _additional {{ id distance }} }} }} }}",
        class,
        arguments,
        fields.join(" ")
    )
}

fn parse_search_response(body: &Value, class: &str) -> AppResult<Vec<SearchHit>> {
    let objects = body
        .pointer(&format!("/data/Get/{}", class))
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Backend(format!("malformed search response for '{}'", class)))?;

    objects
        .iter()
        .map(|object| {
            let fields = object.as_object().ok_or_else(|| {
                AppError::Backend("search result is not an object".to_string())
            })?;
            let id = object
                .pointer("/_additional/id")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Backend("search result without id".to_string()))?;
            let distance = object
                .pointer("/_additional/distance")
                .and_then(Value::as_f64)
                .unwrap_or(1.0);
            let text = fields
                .get(TEXT_PROPERTY)
                .and_then(Value::as_str)
                .unwrap_or_default();

            let metadata = fields
                .iter()
                .filter(|(k, v)| k.as_str() != TEXT_PROPERTY && k.as_str() != "_additional" && !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            Ok(SearchHit {
                id: id.to_string(),
                text: text.to_string(),
                metadata,
                score: (1.0 - distance) as f32,
            })
        })
        .collect()
}

#[async_trait]
impl VectorBackend for WeaviateBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Weaviate
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            filtering: FilterSupport::Native,
            transactional_batches: false,
            requires_unique_ids: true,
            uuid_ids: true,
        }
    }

    async fn collection_exists(&self, collection: &str) -> AppResult<bool> {
        let class = class_name(collection);
        let response = self
            .send_optional(
                self.client.get(self.url(&format!("{}/{}", SCHEMA_ENDPOINT, class))),
                "schema lookup",
            )
            .await?;
        Ok(response.is_some())
    }

    #[instrument(skip(self))]
    async fn create_collection(&self, collection: &str, dimensions: usize) -> AppResult<()> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }

        let class = class_name(collection);
        self.send(
            self.client
                .post(self.url(SCHEMA_ENDPOINT))
                .json(&class_schema(&class, &self.attributes)),
            "create class",
        )
        .await?;

        debug!("Created Weaviate class '{}' for {}-dim vectors", class, dimensions);
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> AppResult<()> {
        let class = class_name(collection);
        self.send_optional(
            self.client.delete(self.url(&format!("{}/{}", SCHEMA_ENDPOINT, class))),
            "drop class",
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> AppResult<()> {
        let class = class_name(collection);
        let objects: Vec<Value> = records.iter().map(|r| batch_object(&class, r)).collect();

        let response = self
            .send(
                self.client
                    .post(self.url(BATCH_ENDPOINT))
                    .json(&json!({ "objects": objects })),
                "batch upsert",
            )
            .await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| map_send_error(e, "batch upsert"))?;

        let errors = batch_errors(&body);
        if !errors.is_empty() {
            return Err(AppError::Backend(format!(
                "batch upsert rejected {} of {} objects: {}",
                errors.len(),
                records.len(),
                errors.join("; ")
            )));
        }
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &Filter) -> AppResult<usize> {
        filter.validate()?;
        let class = class_name(collection);
        let body = json!({
            "match": { "class": class, "where": rest_where(filter) },
            "output": "minimal",
        });

        // Each call deletes at most the server's query limit; repeat until
        // a pass comes back below it.
        let mut deleted = 0usize;
        loop {
            let response = self
                .send(
                    self.client.delete(self.url(BATCH_ENDPOINT)).json(&body),
                    "batch delete",
                )
                .await?;
            let result: Value = response
                .json()
                .await
                .map_err(|e| map_send_error(e, "batch delete"))?;

            let pass = parse_delete_result(&result, &class)?;
            deleted += pass.successful;
            if !pass.needs_another_pass() {
                break;
            }
            debug!(
                "Batch delete in '{}' hit the limit of {} matches, repeating",
                class, pass.matches
            );
        }

        Ok(deleted)
    }

    async fn delete_ids(&self, collection: &str, ids: &[String]) -> AppResult<()> {
        let class = class_name(collection);
        for id in ids {
            self.send_optional(
                self.client
                    .delete(self.url(&format!("{}/{}/{}", OBJECTS_ENDPOINT, class, id))),
                "delete object",
            )
            .await?;
        }
        Ok(())
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> AppResult<HashSet<String>> {
        let class = class_name(collection);
        let mut found = HashSet::new();
        for id in ids {
            let response = self
                .send_optional(
                    self.client
                        .head(self.url(&format!("{}/{}/{}", OBJECTS_ENDPOINT, class, id))),
                    "object lookup",
                )
                .await?;
            if response.is_some() {
                found.insert(id.clone());
            }
        }
        Ok(found)
    }

    #[instrument(skip(self, vector, filter))]
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> AppResult<Vec<SearchHit>> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let class = class_name(collection);
        let query = search_query(&class, vector, top_k, filter, &self.attributes);
        let body = self.graphql(query, "search").await?;
        let mut hits = parse_search_response(&body, &class)?;
        super::rank_hits(&mut hits);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> AppResult<usize> {
        let class = class_name(collection);
        let body = self
            .graphql(
                format!("{{ Aggregate {{ {} {{ meta {{ count }} }} }} }}", class),
                "count",
            )
            .await?;
        Ok(body
            .pointer(&format!("/data/Aggregate/{}/0/meta/count", class))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }
}
