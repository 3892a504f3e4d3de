//! Durable job record and its lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::DocumentSource;

/// Job processing status
///
/// Advances only along the stage order, or jumps to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Fetching,
    Cleaning,
    Chunking,
    Embedding,
    Storing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Cleaning => "cleaning",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Storing => "storing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "fetching" => Self::Fetching,
            "cleaning" => Self::Cleaning,
            "chunking" => Self::Chunking,
            "embedding" => Self::Embedding,
            "storing" => Self::Storing,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Rank along the in-progress ordering; terminal states have no rank.
    pub fn stage_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Fetching => Some(1),
            Self::Cleaning => Some(2),
            Self::Chunking => Some(3),
            Self::Embedding => Some(4),
            Self::Storing => Some(5),
            _ => None,
        }
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Failed | Self::Cancelled) {
            return true;
        }
        match (self.stage_rank(), next.stage_rank()) {
            (Some(a), Some(b)) => b > a,
            (Some(5), None) => next == Self::Completed,
            _ => next == Self::Completed && *self == Self::Storing,
        }
    }
}

/// The durable unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub correlation_id: Option<String>,
    pub source: DocumentSource,
    pub status: JobStatus,
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub documents_stored: Option<i64>,
    pub chunks_created: Option<i64>,
    pub embeddings_generated: Option<i64>,
    pub error_message: Option<String>,
    pub stages_completed: Vec<String>,
    pub source_params: Value,
    pub metadata: Value,
}

impl JobRecord {
    /// A fresh record in `PENDING`, as written at submission time.
    pub fn pending(
        job_id: impl Into<String>,
        source: DocumentSource,
        tenant_id: Option<String>,
        correlation_id: Option<String>,
        source_params: Value,
        metadata: Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            correlation_id,
            source,
            status: JobStatus::Pending,
            tenant_id,
            created_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            documents_stored: None,
            chunks_created: None,
            embeddings_generated: None,
            error_message: None,
            stages_completed: Vec::new(),
            source_params,
            metadata,
        }
    }
}

/// Partial update applied by `JobStore::update_job`
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub documents_stored: Option<i64>,
    pub chunks_created: Option<i64>,
    pub embeddings_generated: Option<i64>,
    pub error_message: Option<String>,
    pub stages_completed: Option<Vec<String>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Filter for job listings; any subset of the fields may be set
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub tenant_id: Option<String>,
    pub status: Option<JobStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// One page of a job listing plus the unpaged total
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub records: Vec<JobRecord>,
    pub total: i64,
}
