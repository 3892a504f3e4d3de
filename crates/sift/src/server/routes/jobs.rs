//! Job submission and query endpoints
//!
//! The thin façade over the pipeline: translate a submission into a PENDING
//! job record plus a background orchestrator task, and serve job lookups.
//! Tenant identity arrives pre-validated in the `X-Tenant-Id` header.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{JobFilter, JobRecord, JobStatus, SourceParams};

/// Job submission payload; source-specific fields ride along flattened.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub source: String,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub correlation_id: String,
    pub status: JobStatus,
}

/// Job record as served over the query API
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub correlation_id: Option<String>,
    pub source: String,
    pub status: JobStatus,
    pub tenant_id: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<f64>,
    pub documents_stored: Option<i64>,
    pub chunks_created: Option<i64>,
    pub embeddings_generated: Option<i64>,
    pub error_message: Option<String>,
    pub stages_completed: Vec<String>,
    pub metadata: Value,
}

impl From<JobRecord> for JobResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            correlation_id: record.correlation_id,
            source: record.source.as_str().to_string(),
            status: record.status,
            tenant_id: record.tenant_id,
            created_at: record.created_at.to_rfc3339(),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
            duration_ms: record.duration_ms,
            documents_stored: record.documents_stored,
            chunks_created: record.chunks_created,
            embeddings_generated: record.embeddings_generated,
            error_message: record.error_message,
            stages_completed: record.stages_completed,
            metadata: record.metadata,
        }
    }
}

fn tenant_from(headers: &HeaderMap, body_tenant: Option<String>) -> Option<String> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(body_tenant)
}

/// POST /api/jobs - submit an ingestion job
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>)> {
    // Parse and validate before anything durable happens.
    let params = SourceParams::from_submission(&request.source, &request.params)?;
    let tenant_id = tenant_from(&headers, request.tenant_id);

    let job_id = format!("job-{}", &Uuid::new_v4().simple().to_string()[..12]);
    let correlation_id = request
        .correlation_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let record = JobRecord::pending(
        &job_id,
        params.source(),
        tenant_id.clone(),
        Some(correlation_id.clone()),
        Value::Object(request.params.clone()),
        request.metadata.unwrap_or_else(|| Value::Object(Map::new())),
    );
    state.jobs().create_job(&record).await?;

    tracing::info!(
        job_id = %job_id,
        correlation_id = %correlation_id,
        source = %request.source,
        tenant_id = tenant_id.as_deref().unwrap_or("-"),
        "job accepted"
    );

    let cancel = state.track_job(&job_id);
    let slots = state.job_slots();
    let orchestrator = state.orchestrator().clone();
    let task_state = state.clone();
    let task_job_id = job_id.clone();
    let task_correlation = correlation_id.clone();
    tokio::spawn(async move {
        let _permit = match slots.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let result = orchestrator
            .run(
                &task_job_id,
                &params,
                tenant_id.as_deref(),
                &task_correlation,
                &cancel,
            )
            .await;
        if let Err(err) = result {
            tracing::debug!(job_id = %task_job_id, error = %err, "pipeline task finished with error");
        }
        task_state.untrack_job(&task_job_id);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            correlation_id,
            status: JobStatus::Pending,
        }),
    ))
}

/// GET /api/jobs/:id - fetch one job record
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>> {
    let record = state
        .jobs()
        .get_job(&job_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("job '{job_id}' not found")))?;
    Ok(Json(record.into()))
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub tenant_id: Option<String>,
    pub status: Option<JobStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// GET /api/jobs - list jobs with optional filters
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>> {
    let filter = JobFilter {
        tenant_id: tenant_from(&headers, query.tenant_id),
        status: query.status,
        created_after: query.created_after,
        created_before: query.created_before,
    };

    let page = state
        .jobs()
        .list_jobs(&filter, query.page, query.page_size)
        .await?;

    Ok(Json(ListJobsResponse {
        jobs: page.records.into_iter().map(JobResponse::from).collect(),
        total: page.total,
        page: query.page,
        page_size: query.page_size.min(1000),
    }))
}

#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    pub cancelling: bool,
}

/// POST /api/jobs/:id/cancel - request cancellation of a running job
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelJobResponse>> {
    let record = state
        .jobs()
        .get_job(&job_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("job '{job_id}' not found")))?;

    if record.status.is_terminal() {
        return Err(Error::Conflict(format!(
            "job '{job_id}' is already {}",
            record.status.as_str()
        )));
    }

    let cancelling = state.cancel_job(&job_id);
    if !cancelling {
        // Not owned by this node; durable state permits no remote takeover.
        return Err(Error::Conflict(format!(
            "job '{job_id}' is not running on this node"
        )));
    }

    Ok(Json(CancelJobResponse { job_id, cancelling }))
}
