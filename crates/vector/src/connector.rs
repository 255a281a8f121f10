//! Backend connection factory.
//!
//! A [`Connector`] holds the resolved settings for every backend and a
//! small pool of live connections, so repeated operations against the same
//! backend reuse one client. Settings come from [`AppConfig`] and are never
//! read from process-global state.

use crate::backend::{Backend, MemoryBackend, SqliteBackend, VectorBackend, WeaviateBackend};
use crate::batch::BatchConfig;
use crate::types::BackendType;
use docindex_core::{AppConfig, AppResult, BackendSettings};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

/// Resolved connection settings for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub dynamic_batching: bool,
    pub timeout_retries: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_in_flight: usize,
    pub attributes: Vec<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self::from_settings(&BackendSettings::default(), None)
    }
}

impl ConnectorConfig {
    pub fn from_settings(settings: &BackendSettings, api_key: Option<String>) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            api_key,
            batch_size: settings.batch_size,
            dynamic_batching: settings.dynamic_batching,
            timeout_retries: settings.timeout_retries,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            read_timeout: Duration::from_secs(settings.read_timeout_secs),
            max_in_flight: settings.max_in_flight,
            attributes: settings.attributes.clone(),
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            dynamic: self.dynamic_batching,
            timeout_retries: self.timeout_retries,
            max_in_flight: self.max_in_flight,
            ..Default::default()
        }
    }
}

/// Builds and caches backend connections.
#[derive(Debug)]
pub struct Connector {
    workspace: PathBuf,
    configs: HashMap<BackendType, ConnectorConfig>,
    pool: Mutex<HashMap<BackendType, Backend>>,
}

impl Connector {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            configs: HashMap::new(),
            pool: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        let mut connector = Self::new(config.workspace.clone());
        for backend in [BackendType::Weaviate, BackendType::Sqlite, BackendType::Memory] {
            let settings = config.backend_settings(backend.as_str());
            let api_key = config.resolve_api_key(backend.as_str());
            connector
                .configs
                .insert(backend, ConnectorConfig::from_settings(&settings, api_key));
        }
        connector
    }

    /// Override the settings of one backend.
    pub fn with_backend(mut self, backend: BackendType, config: ConnectorConfig) -> Self {
        self.configs.insert(backend, config);
        self
    }

    /// Settings for `backend`, defaults when unconfigured.
    pub fn config(&self, backend: BackendType) -> ConnectorConfig {
        self.configs.get(&backend).cloned().unwrap_or_default()
    }

    /// A live connection to `backend`, built on first use.
    pub async fn connect(&self, backend: BackendType) -> AppResult<Backend> {
        let mut pool = self.pool.lock().await;
        if let Some(existing) = pool.get(&backend) {
            return Ok(existing.clone());
        }

        let config = self.config(backend);
        let connected = match backend {
            BackendType::Weaviate => Backend::Weaviate(WeaviateBackend::connect(&config).await?),
            BackendType::Sqlite => {
                let location = self.sqlite_location(config.endpoint.as_deref());
                Backend::Sqlite(SqliteBackend::open(&location)?)
            }
            BackendType::Memory => Backend::Memory(MemoryBackend::new()),
        };

        connected.capabilities().ensure_supported(backend)?;
        tracing::debug!("Connected to {} backend", backend);

        pool.insert(backend, connected.clone());
        Ok(connected)
    }

    fn sqlite_location(&self, endpoint: Option<&str>) -> String {
        match endpoint {
            Some(":memory:") => ":memory:".to_string(),
            Some(path) if Path::new(path).is_absolute() => path.to_string(),
            Some(path) => self.workspace.join(path).to_string_lossy().to_string(),
            None => self
                .workspace
                .join(".docindex")
                .join("vectors.sqlite")
                .to_string_lossy()
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = BackendSettings {
            batch_size: 25,
            dynamic_batching: true,
            read_timeout_secs: 9,
            ..Default::default()
        };
        let config = ConnectorConfig::from_settings(&settings, Some("k".to_string()));
        assert_eq!(config.read_timeout, Duration::from_secs(9));
        assert_eq!(config.api_key.as_deref(), Some("k"));

        let batch = config.batch_config();
        assert_eq!(batch.batch_size, 25);
        assert!(batch.dynamic);
    }

    #[test]
    fn test_sqlite_location() {
        let connector = Connector::new("/srv/ws");
        assert_eq!(connector.sqlite_location(Some(":memory:")), ":memory:");
        assert_eq!(connector.sqlite_location(Some("/tmp/v.db")), "/tmp/v.db");
        assert_eq!(
            connector.sqlite_location(Some("data/v.db")),
            "/srv/ws/data/v.db"
        );
    }

    #[tokio::test]
    async fn test_memory_connection_is_pooled() {
        let connector = Connector::new(".");
        let first = connector.connect(BackendType::Memory).await.unwrap();
        first.create_collection("c", 1).await.unwrap();

        let second = connector.connect(BackendType::Memory).await.unwrap();
        assert!(second.collection_exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_weaviate_requires_endpoint() {
        let connector = Connector::new(".");
        let result = connector.connect(BackendType::Weaviate).await;
        assert!(matches!(result, Err(docindex_core::AppError::Config(_))));
    }

    #[test]
    fn test_from_app_config_resolves_keys() {
        let mut app = AppConfig::default();
        app.index.backends.insert(
            "weaviate".to_string(),
            BackendSettings {
                endpoint: Some("http://w:8080".to_string()),
                api_key: Some("secret".to_string()),
                ..Default::default()
            },
        );
        let connector = Connector::from_app_config(&app);
        let weaviate = connector.config(BackendType::Weaviate);
        assert_eq!(weaviate.endpoint.as_deref(), Some("http://w:8080"));
        assert_eq!(weaviate.api_key.as_deref(), Some("secret"));
    }
}
