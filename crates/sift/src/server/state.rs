//! Application state wiring
//!
//! Builds every collaborator once at startup and shares them behind an Arc.
//! There is no process-wide implicit state; everything the orchestrator
//! needs is constructed here and passed in.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::SiftConfig;
use crate::error::Result;
use crate::pipeline::{ChunkStage, CleanStage, EmbedStage, Orchestrator, StoreStage};
use crate::providers::{
    EmbeddingProvider, HttpEmbeddingProvider, HttpVectorStore, PlainTextExtractor,
};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::sources::{
    AdapterRegistry, ApiFetchAdapter, DatabaseQueryAdapter, FileUploadAdapter, SecEdgarAdapter,
    SourceAdapter, UrlScrapeAdapter,
};
use crate::storage::JobStore;
use crate::telemetry::TelemetrySink;
use crate::tokenizer::TiktokenTokenizer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: SiftConfig,
    jobs: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    /// Kept separately so its engine cache can be closed on shutdown
    db_adapter: Arc<DatabaseQueryAdapter>,
    /// Cancellation handles for jobs currently owned by this node
    running: DashMap<String, CancellationToken>,
    /// Global cap on concurrently executing jobs
    job_slots: Arc<Semaphore>,
}

impl AppState {
    pub async fn new(config: SiftConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!("initializing pipeline state");

        let jobs = Arc::new(
            JobStore::connect(&config.storage.database_url, config.storage.pool_size).await?,
        );
        tracing::info!(database_url = %config.storage.database_url, "job store ready");

        let limiter = Arc::new(RateLimiter::new());
        let retry = RetryPolicy::from_config(&config.retry);
        let telemetry = Arc::new(TelemetrySink::new(&config.telemetry));

        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(HttpEmbeddingProvider::new(&config.embedding)?);
        let vector_store = Arc::new(HttpVectorStore::new(&config.vector_store)?);
        let extractor = Arc::new(PlainTextExtractor);

        let db_adapter = Arc::new(DatabaseQueryAdapter::new(config.db_query.clone()));
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(FileUploadAdapter::new(
                extractor,
                config.file_upload.clone(),
            )),
            Arc::new(SecEdgarAdapter::new(
                limiter.clone(),
                retry.clone(),
                config.sec_edgar.clone(),
                Duration::from_secs_f64(config.rate_limits.sec_edgar),
            )?),
            Arc::new(UrlScrapeAdapter::new(
                limiter.clone(),
                retry.clone(),
                config.url_scrape.clone(),
                Duration::from_secs_f64(config.rate_limits.url_scrape),
            )?),
            Arc::new(ApiFetchAdapter::new(
                limiter.clone(),
                retry.clone(),
                config.api_fetch.clone(),
                Duration::from_secs_f64(config.rate_limits.api_fetch),
            )?),
            db_adapter.clone(),
        ];
        let registry = Arc::new(AdapterRegistry::new(adapters));
        tracing::info!("source adapters registered");

        let tokenizer = Arc::new(TiktokenTokenizer::new(&config.chunking.tokenizer_model)?);
        let orchestrator = Arc::new(Orchestrator::new(
            jobs.clone(),
            telemetry,
            registry,
            CleanStage::new(config.chunking.min_content_length),
            ChunkStage::new(tokenizer, Some(embedder.clone()), config.chunking.clone()),
            EmbedStage::new(
                embedder,
                limiter.clone(),
                retry,
                config.embedding.batch_size,
                config.processing.max_workers_embed,
                Duration::from_secs_f64(config.rate_limits.embedding),
            ),
            StoreStage::new(vector_store),
            Duration::from_secs(config.processing.stage_timeout_secs),
        ));

        let job_slots = Arc::new(Semaphore::new(config.processing.max_workers.max(1)));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                jobs,
                orchestrator,
                db_adapter,
                running: DashMap::new(),
                job_slots,
            }),
        })
    }

    /// Cancel running jobs and release pooled engines.
    pub async fn shutdown(&self) {
        for entry in self.inner.running.iter() {
            entry.value().cancel();
        }
        self.inner.db_adapter.close().await;
        tracing::info!("state shut down");
    }

    pub fn config(&self) -> &SiftConfig {
        &self.inner.config
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.inner.jobs
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.inner.orchestrator
    }

    pub fn job_slots(&self) -> Arc<Semaphore> {
        self.inner.job_slots.clone()
    }

    /// Register a cancellation handle for a job this node owns.
    pub fn track_job(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner.running.insert(job_id.to_string(), token.clone());
        token
    }

    /// Drop the handle once the job reaches a terminal state.
    pub fn untrack_job(&self, job_id: &str) {
        self.inner.running.remove(job_id);
    }

    /// Cancel a running job. Returns false when this node does not own it.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        match self.inner.running.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
