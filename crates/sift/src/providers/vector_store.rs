//! Downstream vector store client
//!
//! The store is an external service; the pipeline only needs tenant-scoped
//! bulk upserts. Its own retry policy is opaque to us; a failed upsert fails
//! the stage.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::VectorStoreConfig;
use crate::error::{Error, Result};
use crate::types::VectorRecord;

/// Trait for the tenant-partitioned vector store
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a batch of records under one tenant. All-or-nothing.
    async fn upsert(&self, tenant_id: &str, records: &[VectorRecord]) -> Result<()>;

    /// The batch size the store prefers for bulk writes.
    fn preferred_batch_size(&self) -> usize;

    /// Check if the store is reachable.
    async fn health_check(&self) -> bool;

    /// Store name for logging.
    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    tenant_id: &'a str,
    records: &'a [VectorRecord],
}

/// HTTP implementation posting bulk upserts to the configured service.
pub struct HttpVectorStore {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
}

impl HttpVectorStore {
    pub fn new(cfg: &VectorStoreConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !cfg.api_key.is_empty() {
            let auth = format!("Bearer {}", cfg.api_key.trim());
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&auth)
                    .map_err(|_| Error::Config("invalid vector store API key".into()))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build vector store client: {e}")))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            batch_size: cfg.batch_size.max(1),
        })
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(&self, tenant_id: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let url = format!("{}/api/v1/vectors/upsert", self.base_url);
        let request = UpsertRequest { tenant_id, records };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status, "vector store upsert"));
        }

        Ok(())
    }

    fn preferred_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(
            self.client.get(&url).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    fn name(&self) -> &str {
        "http-vector-store"
    }
}
