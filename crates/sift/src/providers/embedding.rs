//! Embedding provider trait and the HTTP implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Trait for generating text embeddings
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one vector per input text, ordered to match the inputs.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimension of the configured model.
    fn dimensions(&self) -> usize;

    /// Model identifier recorded on each embedding.
    fn model_id(&self) -> &str;

    /// Estimated cost of embedding `total_tokens` tokens.
    fn estimate_cost(&self, total_tokens: usize) -> f64;

    /// Check if the provider is reachable.
    async fn health_check(&self) -> bool;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    unit_cost_per_1k_tokens: f64,
}

impl HttpEmbeddingProvider {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !cfg.api_key.is_empty() {
            let auth = format!("Bearer {}", cfg.api_key.trim());
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&auth)
                    .map_err(|_| Error::Config("invalid embedding API key".into()))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build embedding client: {e}")))?;

        let dimensions = match cfg.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            dimensions,
            unit_cost_per_1k_tokens: cfg.unit_cost_per_1k_tokens,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, "embedding request"));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("failed to parse embedding response: {e}")))?;

        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(Error::internal(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn estimate_cost(&self, total_tokens: usize) -> f64 {
        total_tokens as f64 / 1000.0 * self.unit_cost_per_1k_tokens
    }

    async fn health_check(&self) -> bool {
        // A bare request to the endpoint root; any response means reachable.
        self.client.get(&self.endpoint).send().await.is_ok()
    }

    fn name(&self) -> &str {
        "http-embeddings"
    }
}
