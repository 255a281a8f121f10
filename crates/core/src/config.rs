//! Configuration management for docindex.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults (local SQLite backend, trigram embeddings)
//! - Config file (`.docindex/config.yaml` or `DOCINDEX_CONFIG`)
//! - Environment variables
//! - Command-line flags (`with_overrides`)
//!
//! The result is an immutable value handed to connector construction;
//! nothing here is process-global.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Backend names the connector knows how to build.
pub const KNOWN_BACKENDS: [&str; 3] = ["weaviate", "sqlite", "memory"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Workspace root (contains .docindex/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Log output format ("text" or "json")
    pub log_format: String,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Indexing settings
    pub index: IndexSettings,
}

/// Settings for the indexing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSettings {
    /// Backend used for newly created indexes
    #[serde(default = "default_backend")]
    pub default_backend: String,

    /// Per-backend connector settings, keyed by backend name
    #[serde(default)]
    pub backends: HashMap<String, BackendSettings>,

    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Directory holding persisted index descriptors
    #[serde(default)]
    pub descriptor_dir: Option<PathBuf>,
}

/// Connector settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendSettings {
    /// Network address (URL) or, for sqlite, a database path
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Inline credential
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the credential
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Documents per upsert round trip
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Let the connector resize batches from observed latency
    #[serde(default)]
    pub dynamic_batching: bool,

    /// Retries after a read timeout before failing
    #[serde(default = "default_timeout_retries")]
    pub timeout_retries: u32,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Upsert batches allowed in flight at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Metadata fields returned with query results
    #[serde(default = "default_attributes")]
    pub attributes: Vec<String>,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSettings {
    /// Provider name: "trigram" or "ollama"
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Vector dimensions
    pub dimensions: usize,

    /// Provider endpoint (ollama)
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_timeout_retries() -> u32 {
    3
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    60
}

fn default_max_in_flight() -> usize {
    4
}

fn default_attributes() -> Vec<String> {
    vec![
        "doc_id".to_string(),
        "dataset_id".to_string(),
        "document_id".to_string(),
    ]
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_key_env: None,
            batch_size: default_batch_size(),
            dynamic_batching: false,
            timeout_retries: default_timeout_retries(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_in_flight: default_max_in_flight(),
            attributes: default_attributes(),
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            endpoint: None,
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        let mut backends = HashMap::new();
        backends.insert(
            "sqlite".to_string(),
            BackendSettings {
                endpoint: Some(".docindex/vectors.sqlite".to_string()),
                ..Default::default()
            },
        );

        Self {
            default_backend: default_backend(),
            backends,
            embedding: EmbeddingSettings::default(),
            descriptor_dir: None,
        }
    }
}

/// Config file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    index: Option<IndexSettings>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    format: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            log_level: None,
            log_format: "text".to_string(),
            verbose: false,
            no_color: false,
            index: IndexSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the config file and the environment.
    ///
    /// Environment variables:
    /// - `DOCINDEX_WORKSPACE`: workspace path
    /// - `DOCINDEX_CONFIG`: config file path
    /// - `DOCINDEX_BACKEND`: backend for new indexes
    /// - `DOCINDEX_ENDPOINT`: endpoint of that backend
    /// - `DOCINDEX_API_KEY`: credential for that backend
    /// - `RUST_LOG`: log level
    /// - `NO_COLOR`: disable colored output
    pub fn load() -> AppResult<Self> {
        Self::load_from(None, None)
    }

    /// Like [`AppConfig::load`], with workspace and config file given
    /// explicitly (command-line flags) taking precedence over the environment.
    pub fn load_from(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        let workspace =
            workspace.or_else(|| std::env::var("DOCINDEX_WORKSPACE").ok().map(PathBuf::from));
        if let Some(workspace) = workspace {
            config.workspace = workspace;
        }

        config.config_file =
            config_file.or_else(|| std::env::var("DOCINDEX_CONFIG").ok().map(PathBuf::from));

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.docindex_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        if let Ok(backend) = std::env::var("DOCINDEX_BACKEND") {
            config.index.default_backend = backend;
        }

        if let Ok(endpoint) = std::env::var("DOCINDEX_ENDPOINT") {
            config.active_backend_mut().endpoint = Some(endpoint);
        }

        if let Ok(api_key) = std::env::var("DOCINDEX_API_KEY") {
            config.active_backend_mut().api_key = Some(api_key);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML config file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(format) = logging.format {
                result.log_format = format;
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(index) = config_file.index {
            result.index.default_backend = index.default_backend;
            result.index.embedding = index.embedding;
            if index.descriptor_dir.is_some() {
                result.index.descriptor_dir = index.descriptor_dir;
            }
            // File entries replace built-in entries of the same name only.
            result.index.backends.extend(index.backends);
        }

        Ok(result)
    }

    /// Apply CLI overrides; flags win over environment and file.
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        backend: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(backend) = backend {
            self.index.default_backend = backend;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Path to the .docindex directory.
    pub fn docindex_dir(&self) -> PathBuf {
        self.workspace.join(".docindex")
    }

    /// Ensure the .docindex directory exists.
    pub fn ensure_docindex_dir(&self) -> AppResult<()> {
        let dir = self.docindex_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .docindex directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Directory where index descriptors are persisted.
    pub fn descriptor_dir(&self) -> PathBuf {
        match &self.index.descriptor_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.workspace.join(dir),
            None => self.docindex_dir().join("descriptors"),
        }
    }

    /// Settings for a backend, falling back to defaults when unconfigured.
    pub fn backend_settings(&self, backend: &str) -> BackendSettings {
        self.index.backends.get(backend).cloned().unwrap_or_default()
    }

    fn active_backend_mut(&mut self) -> &mut BackendSettings {
        let name = self.index.default_backend.clone();
        self.index.backends.entry(name).or_default()
    }

    /// Resolve a backend credential: inline key first, then its env var.
    pub fn resolve_api_key(&self, backend: &str) -> Option<String> {
        let settings = self.index.backends.get(backend)?;

        if let Some(ref key) = settings.api_key {
            return Some(key.clone());
        }

        settings
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
    }

    /// Validate configuration before any connector is built.
    pub fn validate(&self) -> AppResult<()> {
        let backend = &self.index.default_backend;
        if !KNOWN_BACKENDS.contains(&backend.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown backend: {}. Supported: {}",
                backend,
                KNOWN_BACKENDS.join(", ")
            )));
        }

        for (name, settings) in &self.index.backends {
            if !KNOWN_BACKENDS.contains(&name.as_str()) {
                return Err(AppError::Config(format!(
                    "Settings given for unknown backend '{}'",
                    name
                )));
            }
            if settings.batch_size == 0 {
                return Err(AppError::Config(format!(
                    "Backend '{}': batchSize must be at least 1",
                    name
                )));
            }
            if settings.max_in_flight == 0 {
                return Err(AppError::Config(format!(
                    "Backend '{}': maxInFlight must be at least 1",
                    name
                )));
            }
            if settings.connect_timeout_secs == 0 || settings.read_timeout_secs == 0 {
                return Err(AppError::Config(format!(
                    "Backend '{}': timeouts must be non-zero",
                    name
                )));
            }
        }

        if backend == "weaviate" && self.backend_settings(backend).endpoint.is_none() {
            return Err(AppError::Config(
                "Backend 'weaviate' requires an endpoint".to_string(),
            ));
        }

        if self.index.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "Embedding dimensions must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.index.default_backend, "sqlite");
        assert_eq!(config.index.embedding.provider, "trigram");
        assert!(!config.verbose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_settings_defaults() {
        let settings = BackendSettings::default();
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.timeout_retries, 3);
        assert_eq!(settings.connect_timeout_secs, 5);
        assert_eq!(settings.read_timeout_secs, 60);
        assert!(!settings.dynamic_batching);
        assert!(settings.attributes.contains(&"document_id".to_string()));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default().with_overrides(
            None,
            Some("memory".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(config.index.default_backend, "memory");
        assert!(config.verbose);
        assert_eq!(config.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_validate_unknown_backend() {
        let mut config = AppConfig::default();
        config.index.default_backend = "pinecone".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_weaviate_requires_endpoint() {
        let mut config = AppConfig::default();
        config.index.default_backend = "weaviate".to_string();
        assert!(config.validate().is_err());

        config.index.backends.insert(
            "weaviate".to_string(),
            BackendSettings {
                endpoint: Some("http://localhost:8080".to_string()),
                ..Default::default()
            },
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = AppConfig::default();
        config.index.backends.insert(
            "memory".to_string(),
            BackendSettings {
                batch_size: 0,
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
index:
  defaultBackend: weaviate
  backends:
    weaviate:
      endpoint: http://weaviate:8080
      apiKeyEnv: WEAVIATE_KEY
      batchSize: 50
      dynamicBatching: true
  embedding:
    provider: ollama
    model: nomic-embed-text
    dimensions: 768
logging:
  level: debug
  format: json
"#,
        )
        .unwrap();

        let config = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(config.index.default_backend, "weaviate");
        let weaviate = config.backend_settings("weaviate");
        assert_eq!(weaviate.batch_size, 50);
        assert!(weaviate.dynamic_batching);
        assert_eq!(weaviate.timeout_retries, 3);
        // Built-in sqlite entry survives the merge.
        assert!(config.index.backends.contains_key("sqlite"));
        assert_eq!(config.index.embedding.dimensions, 768);
        assert_eq!(config.log_format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_inline_api_key() {
        let mut config = AppConfig::default();
        config.index.backends.insert(
            "weaviate".to_string(),
            BackendSettings {
                api_key: Some("secret".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(config.resolve_api_key("weaviate"), Some("secret".to_string()));
        assert_eq!(config.resolve_api_key("memory"), None);
    }

    #[test]
    fn test_descriptor_dir_relative_to_workspace() {
        let mut config = AppConfig::default();
        config.workspace = PathBuf::from("/srv/ws");
        assert_eq!(
            config.descriptor_dir(),
            PathBuf::from("/srv/ws/.docindex/descriptors")
        );

        config.index.descriptor_dir = Some(PathBuf::from("meta"));
        assert_eq!(config.descriptor_dir(), PathBuf::from("/srv/ws/meta"));
    }

    #[test]
    fn test_load_from_reads_workspace_config() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".docindex")).unwrap();
        std::fs::write(
            temp.path().join(".docindex").join("config.yaml"),
            "index:\n  embedding:\n    provider: trigram\n    model: trigram-v1\n    dimensions: 64\n",
        )
        .unwrap();

        let config = AppConfig::load_from(Some(temp.path().to_path_buf()), None).unwrap();
        assert_eq!(config.workspace, temp.path());
        assert_eq!(config.index.embedding.dimensions, 64);

        let missing = temp.path().join("nope");
        assert!(AppConfig::load_from(Some(missing), None).is_err());
    }
}
