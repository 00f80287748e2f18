//! Ollama HTTP client for embedding generation.
//!
//! Uses the Ollama API at /api/embeddings to generate vectors
//! with the nomic-embed-text model (768 dimensions).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sift_core::{Capability, CollaboratorError, Embedder, RetryPolicy};
use tracing::debug;

/// Default Ollama API URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default embedding model.
pub const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Expected embedding dimension for nomic-embed-text.
pub const EMBEDDING_DIM: usize = 768;

/// Ollama embedding client.
#[derive(Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    /// Create a new client with specified URL, model and request timeout.
    pub fn new(base_url: &str, model: &str, dimension: usize, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            retry: RetryPolicy::default(),
            client,
        }
    }

    /// Create a client with default settings (localhost:11434, nomic-embed-text).
    pub fn default_client() -> Self {
        Self::new(DEFAULT_OLLAMA_URL, DEFAULT_MODEL, EMBEDDING_DIM, 30)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(Capability::Embedding, status, &body));
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| {
            CollaboratorError::malformed(
                Capability::Embedding,
                format!("Failed to parse Ollama response: {}", e),
            )
        })?;

        if result.embedding.len() != self.dimension {
            return Err(CollaboratorError::malformed(
                Capability::Embedding,
                format!(
                    "expected {} dimensions from {}, got {}",
                    self.dimension,
                    self.model,
                    result.embedding.len()
                ),
            ));
        }

        debug!(dim = result.embedding.len(), "Generated embedding");
        Ok(result.embedding)
    }

    /// Check if the Ollama service is up and the model is pulled.
    pub async fn health_check(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let text = resp.text().await.unwrap_or_default();
                text.contains(&self.model)
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        self.retry
            .run("ollama.embed", || self.embed_once(text))
            .await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn transport_error(e: reqwest::Error) -> CollaboratorError {
    CollaboratorError::unavailable(
        Capability::Embedding,
        format!("Failed to connect to Ollama: {}", e),
    )
}
