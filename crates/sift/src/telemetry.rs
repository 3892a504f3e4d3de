//! Telemetry events and the HTTP sink
//!
//! Emission is best effort: a transport failure is logged at warning level
//! and never affects the pipeline outcome.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::TelemetryConfig;

/// Event kinds emitted over one job's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobStarted,
    StageCompleted,
    JobCompleted,
    JobFailed,
}

/// Severity attached to each event
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Error,
}

/// The wire shape every event shares
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub service: &'static str,
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub correlation_id: String,
    pub job_id: String,
    pub tenant_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, Value>,
    pub metrics: BTreeMap<String, f64>,
}

impl TelemetryEvent {
    fn new(
        event_type: EventType,
        severity: EventSeverity,
        job_id: &str,
        correlation_id: &str,
        tenant_id: Option<&str>,
    ) -> Self {
        Self {
            service: "sift",
            event_type,
            severity,
            correlation_id: correlation_id.to_string(),
            job_id: job_id.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

/// Sink posting events to an external HTTP collector.
pub struct TelemetrySink {
    client: Option<reqwest::Client>,
    endpoint: String,
}

impl TelemetrySink {
    pub fn new(cfg: &TelemetryConfig) -> Self {
        if cfg.endpoint.is_empty() {
            return Self {
                client: None,
                endpoint: String::new(),
            };
        }

        let timeout = if cfg.timeout_secs == 0 { 5 } else { cfg.timeout_secs };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .ok();

        Self {
            client,
            endpoint: cfg.endpoint.clone(),
        }
    }

    /// A sink that drops everything; used when no collector is configured.
    pub fn disabled() -> Self {
        Self {
            client: None,
            endpoint: String::new(),
        }
    }

    async fn emit(&self, event: TelemetryEvent) {
        let Some(client) = &self.client else {
            return;
        };

        let result = client.post(&self.endpoint).json(&event).send().await;
        match result {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(
                    status = %resp.status(),
                    event_type = ?event.event_type,
                    job_id = %event.job_id,
                    "telemetry collector rejected event"
                );
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    event_type = ?event.event_type,
                    job_id = %event.job_id,
                    "failed to emit telemetry event"
                );
            }
            _ => {}
        }
    }

    pub async fn job_started(
        &self,
        job_id: &str,
        correlation_id: &str,
        tenant_id: Option<&str>,
        source: &str,
    ) {
        self.emit(
            TelemetryEvent::new(
                EventType::JobStarted,
                EventSeverity::Info,
                job_id,
                correlation_id,
                tenant_id,
            )
            .with_metadata("source", Value::String(source.to_string())),
        )
        .await;
    }

    pub async fn stage_completed(
        &self,
        job_id: &str,
        correlation_id: &str,
        tenant_id: Option<&str>,
        stage: &str,
        duration_ms: f64,
        items_processed: usize,
    ) {
        self.emit(
            TelemetryEvent::new(
                EventType::StageCompleted,
                EventSeverity::Info,
                job_id,
                correlation_id,
                tenant_id,
            )
            .with_metadata("stage", Value::String(stage.to_string()))
            .with_metric("duration_ms", duration_ms)
            .with_metric("items_processed", items_processed as f64),
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn job_completed(
        &self,
        job_id: &str,
        correlation_id: &str,
        tenant_id: Option<&str>,
        duration_ms: f64,
        documents_stored: usize,
        chunks_created: usize,
        embeddings_generated: usize,
    ) {
        self.emit(
            TelemetryEvent::new(
                EventType::JobCompleted,
                EventSeverity::Info,
                job_id,
                correlation_id,
                tenant_id,
            )
            .with_metric("duration_ms", duration_ms)
            .with_metric("documents_stored", documents_stored as f64)
            .with_metric("chunks_created", chunks_created as f64)
            .with_metric("embeddings_generated", embeddings_generated as f64),
        )
        .await;
    }

    pub async fn job_failed(
        &self,
        job_id: &str,
        correlation_id: &str,
        tenant_id: Option<&str>,
        failed_stage: &str,
        error_kind: &str,
        error_message: &str,
    ) {
        self.emit(
            TelemetryEvent::new(
                EventType::JobFailed,
                EventSeverity::Error,
                job_id,
                correlation_id,
                tenant_id,
            )
            .with_metadata("failed_stage", Value::String(failed_stage.to_string()))
            .with_metadata("error_type", Value::String(error_kind.to_string()))
            .with_metadata("error_message", Value::String(error_message.to_string())),
        )
        .await;
    }
}
