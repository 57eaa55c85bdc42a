use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{EmbedderConfig, HashingEmbedderConfig, OpenAiEmbedderConfig};

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding response malformed: {0}")]
    Malformed(String),
}

/// Computes embeddings for text batches. External collaborator seam: the
/// service never computes embeddings itself.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    fn dimensions(&self) -> usize;
}

/// OpenAI-compatible `/embeddings` endpoint client.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &OpenAiEmbedderConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimensions: config.dimensions,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response: EmbeddingResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.data.len() != texts.len() {
            return Err(EmbedderError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        // The API may return out of order; index restores input order.
        let mut ordered = vec![Vec::new(); texts.len()];
        for datum in response.data {
            let slot = ordered
                .get_mut(datum.index)
                .ok_or_else(|| EmbedderError::Malformed("index out of range".into()))?;
            *slot = datum.embedding;
        }
        Ok(ordered)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic feature-hashing embedder for local development and tests.
///
/// Tokens hash into buckets; the vector is L2-normalized so cosine
/// similarity behaves. Not semantically meaningful, but stable and fast.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(config: &HashingEmbedderConfig) -> Self {
        Self {
            dimensions: config.dimensions,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0f32; self.dimensions];
        for token in text.split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Build an embedder from configuration; `None` disables vector indexing.
pub fn create_embedder(
    config: &EmbedderConfig,
    client: reqwest::Client,
) -> Option<std::sync::Arc<dyn Embedder>> {
    match config {
        EmbedderConfig::None => None,
        EmbedderConfig::OpenAi(cfg) => Some(std::sync::Arc::new(OpenAiEmbedder::new(cfg, client))),
        EmbedderConfig::Hashing(cfg) => Some(std::sync::Arc::new(HashingEmbedder::new(cfg))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(&HashingEmbedderConfig { dimensions: 64 });
        let texts = vec!["the quick brown fox".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashing_embedder_distinguishes_texts() {
        let embedder = HashingEmbedder::new(&HashingEmbedderConfig { dimensions: 64 });
        let vectors = embedder
            .embed(&["alpha beta".to_string(), "gamma delta".to_string()])
            .await
            .unwrap();
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn openai_embedder_parses_and_reorders() {
        use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]},
                ]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(
            &OpenAiEmbedderConfig {
                base_url: server.uri(),
                model: "test-embed".into(),
                api_key: None,
                dimensions: 2,
            },
            reqwest::Client::new(),
        );

        let vectors = embedder
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }
}
