//! Pipeline orchestrator
//!
//! Sequences the five stages for one job, owns every status transition on
//! the job record, and funnels all stage errors into a single terminal
//! FAILED transition. Mid-pipeline record updates are best effort; the
//! terminal update is surfaced.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pipeline::{ChunkStage, CleanStage, EmbedStage, StoreStage};
use crate::sources::{dedupe_document_ids, AdapterRegistry};
use crate::storage::JobStore;
use crate::telemetry::TelemetrySink;
use crate::types::{JobPatch, JobRecord, JobStatus, SourceParams};

pub struct Orchestrator {
    jobs: Arc<JobStore>,
    telemetry: Arc<TelemetrySink>,
    adapters: Arc<AdapterRegistry>,
    clean: CleanStage,
    chunk: ChunkStage,
    embed: EmbedStage,
    store: StoreStage,
    stage_timeout: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<JobStore>,
        telemetry: Arc<TelemetrySink>,
        adapters: Arc<AdapterRegistry>,
        clean: CleanStage,
        chunk: ChunkStage,
        embed: EmbedStage,
        store: StoreStage,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            telemetry,
            adapters,
            clean,
            chunk,
            embed,
            store,
            stage_timeout,
        }
    }

    /// Execute the pipeline for a job already persisted in PENDING.
    pub async fn run(
        &self,
        job_id: &str,
        params: &SourceParams,
        tenant_id: Option<&str>,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let record = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("job '{job_id}' not found")))?;
        let source = params.source();

        tracing::info!(
            job_id,
            correlation_id,
            source = %source,
            tenant_id = tenant_id.unwrap_or("-"),
            "starting pipeline"
        );
        self.telemetry
            .job_started(job_id, correlation_id, tenant_id, source.as_str())
            .await;

        let mut stages_completed: Vec<String> = Vec::new();

        // FETCH
        if cancel.is_cancelled() {
            return self.finish_cancelled(&record).await;
        }
        self.mark_stage(job_id, JobStatus::Fetching).await;
        let adapter = match self.adapters.get(source) {
            Ok(adapter) => adapter,
            Err(err) => return self.finish_failed(&record, correlation_id, "fetch", err).await,
        };
        let started = Instant::now();
        let mut documents = match self
            .timed("fetch", adapter.fetch(cancel, params, tenant_id))
            .await
        {
            Ok(docs) => docs,
            Err(Error::Cancelled) => return self.finish_cancelled(&record).await,
            Err(err) => return self.finish_failed(&record, correlation_id, "fetch", err).await,
        };
        dedupe_document_ids(&mut documents);
        let fetched_count = documents.len();
        stages_completed.push("fetch".into());
        self.stage_done(
            &record,
            correlation_id,
            "fetch",
            started,
            documents.len(),
            JobPatch {
                documents_stored: Some(documents.len() as i64),
                stages_completed: Some(stages_completed.clone()),
                ..JobPatch::default()
            },
        )
        .await;

        // CLEAN
        if cancel.is_cancelled() {
            return self.finish_cancelled(&record).await;
        }
        self.mark_stage(job_id, JobStatus::Cleaning).await;
        let started = Instant::now();
        let cleaned = self.clean.execute(documents);
        stages_completed.push("clean".into());
        self.stage_done(
            &record,
            correlation_id,
            "clean",
            started,
            cleaned.len(),
            JobPatch {
                stages_completed: Some(stages_completed.clone()),
                ..JobPatch::default()
            },
        )
        .await;

        // CHUNK
        if cancel.is_cancelled() {
            return self.finish_cancelled(&record).await;
        }
        self.mark_stage(job_id, JobStatus::Chunking).await;
        let started = Instant::now();
        let chunks = match self.timed("chunk", self.chunk.execute(cancel, &cleaned)).await {
            Ok(chunks) => chunks,
            Err(Error::Cancelled) => return self.finish_cancelled(&record).await,
            Err(err) => return self.finish_failed(&record, correlation_id, "chunk", err).await,
        };
        stages_completed.push("chunk".into());
        self.stage_done(
            &record,
            correlation_id,
            "chunk",
            started,
            chunks.len(),
            JobPatch {
                chunks_created: Some(chunks.len() as i64),
                stages_completed: Some(stages_completed.clone()),
                ..JobPatch::default()
            },
        )
        .await;

        // EMBED
        if cancel.is_cancelled() {
            return self.finish_cancelled(&record).await;
        }
        self.mark_stage(job_id, JobStatus::Embedding).await;
        let started = Instant::now();
        let embeddings = match self.timed("embed", self.embed.execute(cancel, &chunks)).await {
            Ok(embeddings) => embeddings,
            Err(Error::Cancelled) => return self.finish_cancelled(&record).await,
            Err(err) => return self.finish_failed(&record, correlation_id, "embed", err).await,
        };
        stages_completed.push("embed".into());
        self.stage_done(
            &record,
            correlation_id,
            "embed",
            started,
            embeddings.len(),
            JobPatch {
                embeddings_generated: Some(embeddings.len() as i64),
                stages_completed: Some(stages_completed.clone()),
                ..JobPatch::default()
            },
        )
        .await;

        // STORE
        if cancel.is_cancelled() {
            return self.finish_cancelled(&record).await;
        }
        self.mark_stage(job_id, JobStatus::Storing).await;
        let started = Instant::now();
        let stored = match self
            .timed(
                "store",
                self.store.execute(cancel, tenant_id, &chunks, &embeddings),
            )
            .await
        {
            Ok(stored) => stored,
            Err(Error::Cancelled) => return self.finish_cancelled(&record).await,
            Err(err) => return self.finish_failed(&record, correlation_id, "store", err).await,
        };
        stages_completed.push("store".into());
        self.stage_done(
            &record,
            correlation_id,
            "store",
            started,
            stored,
            JobPatch {
                stages_completed: Some(stages_completed.clone()),
                ..JobPatch::default()
            },
        )
        .await;

        // COMPLETED
        let duration_ms = (Utc::now() - record.created_at).num_milliseconds() as f64;
        self.jobs
            .update_job(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Completed),
                    completed_at: Some(Utc::now()),
                    duration_ms: Some(duration_ms),
                    ..JobPatch::default()
                },
            )
            .await?;
        self.telemetry
            .job_completed(
                job_id,
                correlation_id,
                tenant_id,
                duration_ms,
                fetched_count,
                chunks.len(),
                embeddings.len(),
            )
            .await;

        tracing::info!(
            job_id,
            correlation_id,
            duration_ms,
            chunks = chunks.len(),
            embeddings = embeddings.len(),
            "pipeline completed"
        );
        Ok(())
    }

    /// Wrap a stage future with the per-stage timeout.
    async fn timed<T>(
        &self,
        stage: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::transient(format!(
                "{stage} stage timed out after {}s",
                self.stage_timeout.as_secs()
            ))),
        }
    }

    /// Best-effort transition to a stage's in-progress status.
    async fn mark_stage(&self, job_id: &str, status: JobStatus) {
        if let Err(err) = self.jobs.update_job(job_id, JobPatch::status(status)).await {
            tracing::warn!(job_id, status = status.as_str(), error = %err,
                "failed to record stage transition");
        }
    }

    /// Best-effort counters/stage bookkeeping plus the stage telemetry event.
    async fn stage_done(
        &self,
        record: &JobRecord,
        correlation_id: &str,
        stage: &str,
        started: Instant,
        items: usize,
        patch: JobPatch,
    ) {
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Err(err) = self.jobs.update_job(&record.job_id, patch).await {
            tracing::warn!(job_id = %record.job_id, stage, error = %err,
                "failed to record stage completion");
        }
        self.telemetry
            .stage_completed(
                &record.job_id,
                correlation_id,
                record.tenant_id.as_deref(),
                stage,
                duration_ms,
                items,
            )
            .await;
        tracing::info!(job_id = %record.job_id, stage, items, duration_ms, "stage complete");
    }

    /// Terminal FAILED transition; storage errors here are surfaced.
    async fn finish_failed(
        &self,
        record: &JobRecord,
        correlation_id: &str,
        stage: &str,
        err: Error,
    ) -> Result<()> {
        let duration_ms = (Utc::now() - record.created_at).num_milliseconds() as f64;
        tracing::error!(
            job_id = %record.job_id,
            stage,
            error = %err,
            "pipeline failed"
        );

        self.telemetry
            .job_failed(
                &record.job_id,
                correlation_id,
                record.tenant_id.as_deref(),
                stage,
                err.kind(),
                &err.to_string(),
            )
            .await;

        self.jobs
            .update_job(
                &record.job_id,
                JobPatch {
                    status: Some(JobStatus::Failed),
                    completed_at: Some(Utc::now()),
                    duration_ms: Some(duration_ms),
                    error_message: Some(err.job_message()),
                    ..JobPatch::default()
                },
            )
            .await?;
        Err(err)
    }

    /// Terminal CANCELLED transition; storage errors here are surfaced.
    async fn finish_cancelled(&self, record: &JobRecord) -> Result<()> {
        tracing::info!(job_id = %record.job_id, "pipeline cancelled");
        self.jobs
            .update_job(
                &record.job_id,
                JobPatch {
                    status: Some(JobStatus::Cancelled),
                    completed_at: Some(Utc::now()),
                    duration_ms: Some(
                        (Utc::now() - record.created_at).num_milliseconds() as f64
                    ),
                    error_message: Some(Error::Cancelled.job_message()),
                    ..JobPatch::default()
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::pipeline::chunk::ChunkStrategy;
    use crate::providers::{EmbeddingProvider, VectorStore};
    use crate::rate_limit::RateLimiter;
    use crate::retry::RetryPolicy;
    use crate::sources::SourceAdapter;
    use crate::tokenizer::TiktokenTokenizer;
    use crate::types::{DocumentSource, RawDocument, VectorRecord};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Map};

    #[derive(Clone)]
    enum FetchBehavior {
        Documents(Vec<String>),
        Fail(&'static str),
    }

    struct MockAdapter {
        behavior: FetchBehavior,
    }

    #[async_trait]
    impl SourceAdapter for MockAdapter {
        fn source(&self) -> DocumentSource {
            DocumentSource::FileUpload
        }

        fn validate(&self, _params: &SourceParams) -> Result<()> {
            Ok(())
        }

        async fn fetch(
            &self,
            _cancel: &CancellationToken,
            _params: &SourceParams,
            tenant_id: Option<&str>,
        ) -> Result<Vec<RawDocument>> {
            match &self.behavior {
                FetchBehavior::Documents(contents) => Ok(contents
                    .iter()
                    .enumerate()
                    .map(|(i, content)| {
                        RawDocument::new(
                            format!("doc-{i}"),
                            DocumentSource::FileUpload,
                            content.clone(),
                            Map::new(),
                            tenant_id.map(str::to_string),
                        )
                    })
                    .collect()),
                FetchBehavior::Fail(kind) => Err(match *kind {
                    "not_found" => Error::not_found("file does not exist"),
                    "forbidden" => Error::forbidden("robots.txt disallows it"),
                    _ => Error::internal("boom"),
                }),
            }
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn supported_formats(&self) -> &[&str] {
            &["txt"]
        }
    }

    struct StubEmbedder {
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::RateLimited("HTTP 429".into()));
            }
            Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn model_id(&self) -> &str {
            "stub-model"
        }

        fn estimate_cost(&self, total_tokens: usize) -> f64 {
            total_tokens as f64 * 0.0001
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    struct StubStore {
        upserts: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl VectorStore for StubStore {
        async fn upsert(&self, tenant_id: &str, records: &[VectorRecord]) -> Result<()> {
            self.upserts
                .lock()
                .push((tenant_id.to_string(), records.len()));
            Ok(())
        }

        fn preferred_batch_size(&self) -> usize {
            100
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_millis(50),
            jitter: 0.0,
        }
    }

    async fn harness(
        behavior: FetchBehavior,
        embed_fail: bool,
    ) -> (Arc<JobStore>, Arc<StubStore>, Orchestrator) {
        let jobs = Arc::new(JobStore::in_memory().await.unwrap());
        let telemetry = Arc::new(TelemetrySink::disabled());
        let mock: Arc<dyn SourceAdapter> = Arc::new(MockAdapter { behavior });
        let adapters = Arc::new(AdapterRegistry::new(vec![mock]));

        let tokenizer = Arc::new(TiktokenTokenizer::new("cl100k_base").unwrap());
        let chunk_cfg = ChunkingConfig {
            chunk_size: 50,
            overlap: 5,
            strategy: ChunkStrategy::Token,
            ..ChunkingConfig::default()
        };
        let store = Arc::new(StubStore {
            upserts: Mutex::new(Vec::new()),
        });

        let orchestrator = Orchestrator::new(
            jobs.clone(),
            telemetry,
            adapters,
            CleanStage::new(50),
            ChunkStage::new(tokenizer, None, chunk_cfg),
            EmbedStage::new(
                Arc::new(StubEmbedder {
                    fail: embed_fail,
                    delay: Duration::from_millis(1),
                }),
                Arc::new(RateLimiter::new()),
                quick_retry(),
                10,
                2,
                Duration::from_millis(0),
            ),
            StoreStage::new(store.clone()),
            Duration::from_secs(30),
        );

        (jobs, store, orchestrator)
    }

    fn file_params() -> SourceParams {
        serde_json::from_value(json!({"source": "file_upload", "file_path": "/tmp/x.txt"}))
            .unwrap()
    }

    async fn submit(jobs: &JobStore, job_id: &str) {
        let record = JobRecord::pending(
            job_id,
            DocumentSource::FileUpload,
            Some("tenant-a".into()),
            Some("trace-1".into()),
            json!({"file_path": "/tmp/x.txt"}),
            json!({}),
        );
        jobs.create_job(&record).await.unwrap();
    }

    fn long_text() -> String {
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&format!(
                "Sentence {i} describes one more step of the ingestion pipeline in detail. "
            ));
        }
        text.trim_end().to_string()
    }

    #[tokio::test]
    async fn full_pipeline_completes() {
        let (jobs, store, orchestrator) =
            harness(FetchBehavior::Documents(vec![long_text()]), false).await;
        submit(&jobs, "job-1").await;

        orchestrator
            .run(
                "job-1",
                &file_params(),
                Some("tenant-a"),
                "trace-1",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let record = jobs.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.documents_stored, Some(1));
        assert!(record.chunks_created.unwrap() > 0);
        assert_eq!(record.embeddings_generated, record.chunks_created);
        assert_eq!(
            record.stages_completed,
            vec!["fetch", "clean", "chunk", "embed", "store"]
        );
        assert!(record.completed_at.is_some());
        assert!(record.duration_ms.is_some());
        assert!(record.error_message.is_none());

        // Everything went to the right tenant.
        let upserts = store.upserts.lock();
        assert!(!upserts.is_empty());
        assert!(upserts.iter().all(|(tenant, _)| tenant == "tenant-a"));
    }

    #[tokio::test]
    async fn tiny_document_completes_with_zero_chunks() {
        let (jobs, store, orchestrator) = harness(
            FetchBehavior::Documents(vec![
                "Hello world. This is a very short document.".to_string()
            ]),
            false,
        )
        .await;
        submit(&jobs, "job-1").await;

        orchestrator
            .run(
                "job-1",
                &file_params(),
                Some("tenant-a"),
                "trace-1",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let record = jobs.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.documents_stored, Some(1));
        assert_eq!(record.chunks_created, Some(0));
        assert_eq!(record.embeddings_generated, Some(0));
        assert!(store.upserts.lock().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_job() {
        let (jobs, _, orchestrator) = harness(FetchBehavior::Fail("not_found"), false).await;
        submit(&jobs, "job-1").await;

        let err = orchestrator
            .run(
                "job-1",
                &file_params(),
                Some("tenant-a"),
                "trace-1",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");

        let record = jobs.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        let message = record.error_message.unwrap();
        assert!(message.starts_with("NotFound."));
        assert!(record.completed_at.is_some());
        assert!(record.stages_completed.is_empty());
    }

    #[tokio::test]
    async fn embed_failure_fails_the_job_after_retries() {
        let (jobs, store, orchestrator) =
            harness(FetchBehavior::Documents(vec![long_text()]), true).await;
        submit(&jobs, "job-1").await;

        let err = orchestrator
            .run(
                "job-1",
                &file_params(),
                Some("tenant-a"),
                "trace-1",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "RateLimited");

        let record = jobs.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.chunks_created.unwrap() > 0);
        // Partial embedding is not permitted; nothing was stored.
        assert!(record.embeddings_generated.is_none());
        assert!(store.upserts.lock().is_empty());
        assert_eq!(record.stages_completed, vec!["fetch", "clean", "chunk"]);
    }

    #[tokio::test]
    async fn cancellation_marks_the_job_cancelled() {
        let (jobs, _, orchestrator) =
            harness(FetchBehavior::Documents(vec![long_text()]), false).await;
        submit(&jobs, "job-1").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        orchestrator
            .run("job-1", &file_params(), Some("tenant-a"), "trace-1", &cancel)
            .await
            .unwrap();

        let record = jobs.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn observed_history_is_monotonic() {
        let (jobs, _, orchestrator) =
            harness(FetchBehavior::Documents(vec![long_text()]), false).await;
        submit(&jobs, "job-1").await;

        let watcher = {
            let jobs = jobs.clone();
            tokio::spawn(async move {
                let mut statuses: Vec<JobStatus> = Vec::new();
                let mut counters: Vec<(i64, i64, i64)> = Vec::new();
                loop {
                    if let Some(record) = jobs.get_job("job-1").await.unwrap() {
                        if statuses.last() != Some(&record.status) {
                            statuses.push(record.status);
                        }
                        counters.push((
                            record.documents_stored.unwrap_or(0),
                            record.chunks_created.unwrap_or(0),
                            record.embeddings_generated.unwrap_or(0),
                        ));
                        if record.status.is_terminal() {
                            break;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                (statuses, counters)
            })
        };

        orchestrator
            .run(
                "job-1",
                &file_params(),
                Some("tenant-a"),
                "trace-1",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let (statuses, counters) = watcher.await.unwrap();

        // Status never revisits and only advances along the stage order. The
        // poller may skip states, so compare ordinals rather than single
        // transitions.
        let ordinal = |s: JobStatus| s.stage_rank().unwrap_or(6);
        for pair in statuses.windows(2) {
            assert!(
                ordinal(pair[1]) > ordinal(pair[0]),
                "status went backwards: {:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }

        // Counters never decrease.
        for pair in counters.windows(2) {
            assert!(pair[1].0 >= pair[0].0);
            assert!(pair[1].1 >= pair[0].1);
            assert!(pair[1].2 >= pair[0].2);
        }
    }
}
