use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Embedder selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbedderConfig {
    /// No embedder: vector indexing is disabled, lexical search still works.
    #[default]
    None,

    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi(OpenAiEmbedderConfig),

    /// Deterministic hashing embedder. Local development and tests.
    Hashing(HashingEmbedderConfig),
}

/// OpenAI-compatible embedding endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiEmbedderConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

/// Hashing embedder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashingEmbedderConfig {
    #[serde(default = "default_hashing_dimensions")]
    pub dimensions: usize,
}

/// Vector store selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreKind {
    /// No vector index.
    #[default]
    None,
    /// pgvector tables in the primary PostgreSQL database.
    Pgvector,
    /// Process-local index. Development and tests; not persistent.
    Memory,
}

/// Search and indexing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(default)]
    pub embedder: EmbedderConfig,

    #[serde(default)]
    pub vector: VectorStoreKind,

    /// Indexer poll interval, in seconds.
    #[serde(default = "default_indexer_interval_secs")]
    pub indexer_interval_secs: u64,

    /// Entries embedded per indexer tick.
    #[serde(default = "default_indexer_batch_size")]
    pub indexer_batch_size: i64,
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let embedder_configured = !matches!(self.embedder, EmbedderConfig::None);
        let vector_configured = self.vector != VectorStoreKind::None;
        if embedder_configured != vector_configured {
            return Err(ConfigError::Validation(
                "search.embedder and search.vector must be configured together".into(),
            ));
        }
        Ok(())
    }

    pub fn vector_indexing_enabled(&self) -> bool {
        self.vector != VectorStoreKind::None
    }

    pub fn indexer_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.indexer_interval_secs)
    }
}

fn default_dimensions() -> usize {
    1536
}

fn default_hashing_dimensions() -> usize {
    256
}

fn default_indexer_interval_secs() -> u64 {
    10
}

fn default_indexer_batch_size() -> i64 {
    64
}
