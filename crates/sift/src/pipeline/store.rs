//! Store stage: tenant-scoped upsert into the vector store
//!
//! Records are grouped into the store's preferred batch size. Any batch
//! failure fails the stage; the store's upsert is all-or-nothing per the
//! downstream contract.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::providers::VectorStore;
use crate::types::{Chunk, Embedding, VectorRecord};

/// Tenant used when a job was submitted without one
const DEFAULT_TENANT: &str = "default";

pub struct StoreStage {
    store: Arc<dyn VectorStore>,
}

impl StoreStage {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Upsert one record per chunk. Returns the number of records written.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        tenant_id: Option<&str>,
        chunks: &[Chunk],
        embeddings: &[Embedding],
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(Error::internal(format!(
                "chunk/embedding count mismatch: {} vs {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let tenant = tenant_id.unwrap_or(DEFAULT_TENANT);
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                debug_assert_eq!(chunk.chunk_id, embedding.chunk_id);
                VectorRecord {
                    chunk_id: chunk.chunk_id.clone(),
                    vector: embedding.vector.clone(),
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                }
            })
            .collect();

        let batch_size = self.store.preferred_batch_size().max(1);
        let mut written = 0usize;
        for batch in records.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.store.upsert(tenant, batch).await?;
            written += batch.len();
            tracing::debug!(written, total = records.len(), "upserted batch");
        }

        tracing::info!(records = written, tenant = tenant, "store stage complete");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Map, Value};

    struct RecordingStore {
        batches: Mutex<Vec<(String, usize)>>,
        fail_on_batch: Option<usize>,
        batch_size: usize,
    }

    impl RecordingStore {
        fn new(batch_size: usize, fail_on_batch: Option<usize>) -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail_on_batch,
                batch_size,
            }
        }
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, tenant_id: &str, records: &[VectorRecord]) -> Result<()> {
            let mut batches = self.batches.lock();
            if self.fail_on_batch == Some(batches.len()) {
                return Err(Error::transient("store unavailable"));
            }
            batches.push((tenant_id.to_string(), records.len()));
            Ok(())
        }

        fn preferred_batch_size(&self) -> usize {
            self.batch_size
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn chunk(i: usize) -> Chunk {
        let mut metadata = Map::new();
        metadata.insert("k".into(), Value::String("v".into()));
        Chunk::new("doc-1", format!("text {i}"), 3, i, metadata, None)
    }

    fn embedding(chunk: &Chunk) -> Embedding {
        Embedding {
            chunk_id: chunk.chunk_id.clone(),
            vector: vec![0.1, 0.2],
            model_id: "m".into(),
            estimated_cost: 0.0,
        }
    }

    #[tokio::test]
    async fn groups_records_into_preferred_batches() {
        let store = Arc::new(RecordingStore::new(4, None));
        let stage = StoreStage::new(store.clone());
        let chunks: Vec<Chunk> = (0..10).map(chunk).collect();
        let embeddings: Vec<Embedding> = chunks.iter().map(embedding).collect();

        let written = stage
            .execute(&CancellationToken::new(), Some("tenant-a"), &chunks, &embeddings)
            .await
            .unwrap();

        assert_eq!(written, 10);
        let batches = store.batches.lock();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], ("tenant-a".to_string(), 4));
        assert_eq!(batches[2], ("tenant-a".to_string(), 2));
    }

    #[tokio::test]
    async fn batch_failure_fails_the_stage() {
        let store = Arc::new(RecordingStore::new(4, Some(1)));
        let stage = StoreStage::new(store);
        let chunks: Vec<Chunk> = (0..10).map(chunk).collect();
        let embeddings: Vec<Embedding> = chunks.iter().map(embedding).collect();

        let err = stage
            .execute(&CancellationToken::new(), Some("tenant-a"), &chunks, &embeddings)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Transient");
    }

    #[tokio::test]
    async fn count_mismatch_is_internal() {
        let store = Arc::new(RecordingStore::new(4, None));
        let stage = StoreStage::new(store);
        let chunks: Vec<Chunk> = (0..2).map(chunk).collect();

        let err = stage
            .execute(&CancellationToken::new(), None, &chunks, &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Internal");
    }

    #[tokio::test]
    async fn empty_input_writes_nothing() {
        let store = Arc::new(RecordingStore::new(4, None));
        let stage = StoreStage::new(store.clone());
        let written = stage
            .execute(&CancellationToken::new(), None, &[], &[])
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(store.batches.lock().is_empty());
    }
}
