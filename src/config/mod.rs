//! Configuration management for mailrag
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Local language model configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Mail provider configuration
    #[serde(default)]
    pub graph: GraphConfig,

    /// Query configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend kind: "local" (fastembed) or "http" (embedding sidecar)
    #[serde(default = "default_embedding_backend")]
    pub backend: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Sidecar URL when backend = "http"
    #[serde(default = "default_embedding_backend_url")]
    pub backend_url: String,
}

/// Lookup the expected embedding dimension for a known model
pub fn embedding_dimension_for_model(model: &str) -> Option<usize> {
    match model {
        "sentence-transformers/all-MiniLM-L6-v2" => Some(384),
        "BAAI/bge-small-en-v1.5" => Some(384),
        "BAAI/bge-base-en-v1.5" => Some(768),
        "BAAI/bge-large-en-v1.5" => Some(1024),
        _ => None,
    }
}

impl EmbeddingConfig {
    /// Resolve the effective embedding dimension based on the configured model
    pub fn resolved_dimension(&self) -> usize {
        if let Some(expected) = embedding_dimension_for_model(&self.model) {
            if expected != self.dimension {
                warn!(
                    "Embedding dimension {} does not match model '{}' ({}); using {}",
                    self.dimension, self.model, expected, expected
                );
            }
            expected
        } else {
            self.dimension
        }
    }
}

/// Generation (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Ollama base URL
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model tag to generate with
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Maximum tokens per answer
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: usize,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// CPU/memory sampling interval while generating
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

/// Mail provider (Microsoft Graph) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// API root; pagination links must stay on this host
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,

    /// Environment variable holding the bearer token
    #[serde(default = "default_graph_token_env")]
    pub token_env: String,

    /// Messages requested per page
    #[serde(default = "default_graph_page_size")]
    pub page_size: u32,

    /// Request timeout in seconds
    #[serde(default = "default_graph_timeout")]
    pub timeout_secs: u64,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Default number of results
    #[serde(default = "default_query_k")]
    pub default_k: usize,

    /// Maximum results allowed
    #[serde(default = "default_query_max_results")]
    pub max_results: usize,

    /// Snippet length in characters
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for mailrag data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Append-only JSONL latency log written by `ask`
    pub latency_log: PathBuf,

    /// Suggested Qdrant storage directory
    pub qdrant_dir: PathBuf,
}

impl PathsConfig {
    /// Derive all paths from a base directory
    pub fn under(base: &Path) -> Self {
        Self {
            config_file: base.join("config.toml"),
            db_file: base.join("mail.db"),
            latency_log: base.join("latency_log.jsonl"),
            qdrant_dir: base.join("qdrant"),
            base_dir: base.to_path_buf(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            collection_name: default_collection_name(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            graph: GraphConfig::default(),
            query: QueryConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            backend_url: default_embedding_backend_url(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            model: default_generation_model(),
            max_tokens: default_generation_max_tokens(),
            timeout_secs: default_generation_timeout(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            token_env: default_graph_token_env(),
            page_size: default_graph_page_size(),
            timeout_secs: default_graph_timeout(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_k: default_query_k(),
            max_results: default_query_max_results(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

impl Config {
    /// Get the default base directory for mailrag (~/.mailrag)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mailrag")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig::under(&base);
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Paths follow the config file location
        let base = config_path.parent().unwrap_or(Path::new("."));
        config.paths = PathsConfig::under(base);
        config.paths.config_file = config_path.to_path_buf();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Read the Graph access token from the configured environment variable
    pub fn graph_token(&self) -> Option<String> {
        std::env::var(&self.graph.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }

    /// Check if mailrag is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.embedding.backend.as_str() {
            "local" | "http" => {}
            other => {
                return Err(Error::Config(format!(
                    "embedding.backend must be 'local' or 'http', got '{}'",
                    other
                )))
            }
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.query.default_k == 0 || self.query.default_k > self.query.max_results {
            return Err(Error::Config(
                "query.default_k must be between 1 and query.max_results".to_string(),
            ));
        }

        if self.query.snippet_chars == 0 {
            return Err(Error::Config(
                "query.snippet_chars must be positive".to_string(),
            ));
        }

        if self.generation.max_tokens == 0 {
            return Err(Error::Config(
                "generation.max_tokens must be positive".to_string(),
            ));
        }

        if self.generation.sample_interval_ms == 0 {
            return Err(Error::Config(
                "generation.sample_interval_ms must be positive".to_string(),
            ));
        }

        if self.graph.page_size == 0 {
            return Err(Error::Config("graph.page_size must be positive".to_string()));
        }

        url::Url::parse(&self.graph.base_url)
            .map_err(|e| Error::Config(format!("graph.base_url is not a valid URL: {}", e)))?;

        Ok(())
    }
}
