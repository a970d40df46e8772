//! SDK configuration

use std::path::{Path, PathBuf};

use mnemo_core::{BufferConfig, ConsolidationConfig, ProviderLimits, RetrievalConfig, ScoringConfig};
use serde::{Deserialize, Serialize};

use crate::error::SdkResult;

/// Main configuration for the memory orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    /// Short-term buffer configuration
    pub buffer: BufferConfig,

    /// Importance scoring configuration
    pub scoring: ScoringConfig,

    /// Consolidation configuration
    pub consolidation: ConsolidationConfig,

    /// Retrieval configuration
    pub retrieval: RetrievalConfig,

    /// Provider gate and embedder selection
    pub providers: ProviderConfig,

    /// Long-term store configuration
    pub store: StoreConfig,

    /// Project context assembly
    pub context: ContextConfig,

    /// Largest accepted memory content, in bytes
    pub max_content_bytes: usize,

    /// Run the background consolidation worker
    pub background_worker: bool,
}

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            scoring: ScoringConfig::default(),
            consolidation: ConsolidationConfig::default(),
            retrieval: RetrievalConfig::default(),
            providers: ProviderConfig::default(),
            store: StoreConfig::default(),
            context: ContextConfig::default(),
            max_content_bytes: 32 * 1024,
            background_worker: true,
        }
    }
}

/// Which embedding provider to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Feature-hashed bag of words, no I/O
    #[default]
    Hash,
    /// Local model via fastembed (feature `embeddings`)
    Fastembed,
    /// OpenAI-compatible endpoint (feature `http-embeddings`)
    Http,
}

/// Provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Retry policy, concurrency cap and call timeout
    #[serde(flatten)]
    pub limits: ProviderLimits,

    /// Embedding provider
    pub embedder: EmbedderKind,

    /// Endpoint settings for [`EmbedderKind::Http`]
    pub http: HttpEmbedderConfig,
}

/// OpenAI-compatible embedding endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEmbedderConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
}

impl Default for HttpEmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            model: "all-minilm".into(),
            api_key_env: None,
        }
    }
}

/// Long-term store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Long-term store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database file for the SQLite backend
    pub path: Option<PathBuf>,

    /// Embedding dimension shared by the embedder and the store
    pub embedding_dimension: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            embedding_dimension: 384,
        }
    }
}

/// Project context configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Most recent buffer items returned as `recent`
    pub recent_items: usize,

    /// Ranked items returned as `relevant`
    pub relevant_items: usize,

    /// Characters of recent content used as the relevance query
    pub query_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_items: 10,
            relevant_items: 5,
            query_chars: 2000,
        }
    }
}

impl MnemoConfig {
    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Set buffer configuration
    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set scoring configuration
    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// Set consolidation configuration
    pub fn with_consolidation(mut self, consolidation: ConsolidationConfig) -> Self {
        self.consolidation = consolidation;
        self
    }

    /// Set retrieval configuration
    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Set provider configuration
    pub fn with_providers(mut self, providers: ProviderConfig) -> Self {
        self.providers = providers;
        self
    }

    /// Use a SQLite store at the given path
    pub fn with_sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.store.backend = StoreBackend::Sqlite;
        self.store.path = Some(path.into());
        self
    }

    /// Set the embedding dimension
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.store.embedding_dimension = dimension;
        self
    }

    /// Enable or disable the background worker
    pub fn with_background_worker(mut self, enabled: bool) -> Self {
        self.background_worker = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.buffer.validate().map_err(invalid)?;
        self.scoring.validate().map_err(invalid)?;
        self.consolidation.validate().map_err(invalid)?;
        self.retrieval.validate().map_err(invalid)?;
        self.providers.limits.validate().map_err(invalid)?;

        if self.max_content_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "max_content_bytes".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.store.embedding_dimension == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "store.embedding_dimension".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.store.backend == StoreBackend::Sqlite && self.store.path.is_none() {
            return Err(ConfigValidationError::MissingStorePath);
        }

        if self.providers.embedder == EmbedderKind::Http && self.providers.http.base_url.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "providers.http.base_url".into(),
                message: "required for the http embedder".into(),
            });
        }

        if self.context.recent_items == 0 && self.context.relevant_items == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "context".into(),
                message: "recent_items and relevant_items cannot both be 0".into(),
            });
        }

        Ok(())
    }
}

fn invalid((field, message): (&'static str, String)) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message,
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("store.path is required for the sqlite backend")]
    MissingStorePath,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
