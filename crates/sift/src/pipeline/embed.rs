//! Embed stage: batched provider calls with bounded concurrency
//!
//! Chunks go to the provider in batches; at most `max_workers` batches are
//! in flight at once. Vectors commit to chunk ids by index, so the output
//! order always matches the input order regardless of completion order.
//! A batch that fails terminally fails the whole job.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::types::{Chunk, Embedding};

/// Limiter key shared by every embedding call
const RATE_LIMIT_KEY: &str = "embedding-provider";

pub struct EmbedStage {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    batch_size: usize,
    max_workers: usize,
    rate_delay: Duration,
}

impl EmbedStage {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        batch_size: usize,
        max_workers: usize,
        rate_delay: Duration,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry,
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
            rate_delay,
        }
    }

    /// Embed every chunk, returning one embedding per chunk in input order.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        chunks: &[Chunk],
    ) -> Result<Vec<Embedding>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let batches: Vec<&[Chunk]> = chunks.chunks(self.batch_size).collect();
        let batch_count = batches.len();

        tracing::info!(
            chunks = chunks.len(),
            batches = batch_count,
            batch_size = self.batch_size,
            max_workers = self.max_workers,
            "embed stage starting"
        );

        let futures = batches.into_iter().enumerate().map(|(batch_index, batch)| {
            let semaphore = semaphore.clone();
            let provider = self.provider.clone();
            let limiter = self.limiter.clone();
            let retry = self.retry.clone();
            let cancel = cancel.clone();
            let rate_delay = self.rate_delay;
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| Error::internal("embed semaphore closed"))?;
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let vectors = retry
                    .run(&cancel, || {
                        let provider = provider.clone();
                        let limiter = limiter.clone();
                        let texts = texts.clone();
                        async move {
                            limiter.acquire(RATE_LIMIT_KEY, rate_delay).await;
                            provider.embed_batch(&texts).await
                        }
                    })
                    .await?;

                if vectors.len() != texts.len() {
                    return Err(Error::internal(format!(
                        "batch {batch_index}: provider returned {} vectors for {} chunks",
                        vectors.len(),
                        texts.len()
                    )));
                }

                tracing::debug!(batch_index, vectors = vectors.len(), "embedded batch");
                Ok((batch_index, vectors))
            }
        });

        let mut by_index: Vec<Option<Vec<Vec<f32>>>> = vec![None; batch_count];
        for result in join_all(futures).await {
            let (batch_index, vectors) = result?;
            by_index[batch_index] = Some(vectors);
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        let mut chunk_iter = chunks.iter();
        for slot in by_index {
            let vectors = slot.ok_or_else(|| Error::internal("missing embedding batch"))?;
            for vector in vectors {
                let chunk = chunk_iter
                    .next()
                    .ok_or_else(|| Error::internal("more vectors than chunks"))?;
                embeddings.push(Embedding {
                    chunk_id: chunk.chunk_id.clone(),
                    vector,
                    model_id: self.provider.model_id().to_string(),
                    estimated_cost: self.provider.estimate_cost(chunk.token_count),
                });
            }
        }

        tracing::info!(
            embeddings = embeddings.len(),
            total_cost = embeddings.iter().map(|e| e.estimated_cost).sum::<f64>(),
            "embed stage complete"
        );
        Ok(embeddings)
    }
}
