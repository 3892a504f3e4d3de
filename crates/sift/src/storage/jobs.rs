//! Durable, queryable job store
//!
//! Backed by SQLite through an async connection pool. Every update is a
//! single-row transaction; listings are served by the composite indexes
//! created at startup.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::types::{DocumentSource, JobFilter, JobPage, JobPatch, JobRecord, JobStatus};

/// Maximum page size served by `list_jobs`
const MAX_PAGE_SIZE: u32 = 1000;

/// SQLite-backed job store
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (or create) the store at `database_url` with the given pool size.
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Config(format!("invalid database url: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Config(format!("invalid database url: {e}")))?;

        // A single connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id                TEXT PRIMARY KEY,
                correlation_id        TEXT,
                source                TEXT NOT NULL,
                status                TEXT NOT NULL,
                tenant_id             TEXT,
                created_at            TEXT NOT NULL,
                completed_at          TEXT,
                duration_ms           REAL,
                documents_stored      INTEGER,
                chunks_created        INTEGER,
                embeddings_generated  INTEGER,
                error_message         TEXT,
                stages_completed      TEXT NOT NULL DEFAULT '[]',
                source_params         TEXT NOT NULL DEFAULT '{}',
                metadata              TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_jobs_correlation ON jobs(correlation_id)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_tenant_status ON jobs(tenant_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_tenant_created ON jobs(tenant_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::debug!("job store migrations complete");
        Ok(())
    }

    /// Insert a new record; fails with `Conflict` if the job id exists.
    pub async fn create_job(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, correlation_id, source, status, tenant_id,
                created_at, completed_at, duration_ms,
                documents_stored, chunks_created, embeddings_generated,
                error_message, stages_completed, source_params, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.correlation_id)
        .bind(record.source.as_str())
        .bind(record.status.as_str())
        .bind(&record.tenant_id)
        .bind(record.created_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(record.duration_ms)
        .bind(record.documents_stored)
        .bind(record.chunks_created)
        .bind(record.embeddings_generated)
        .bind(&record.error_message)
        .bind(serde_json::to_string(&record.stages_completed)?)
        .bind(serde_json::to_string(&record.source_params)?)
        .bind(serde_json::to_string(&record.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => {
                Error::Conflict(format!("job '{}' already exists", record.job_id))
            }
            other => other,
        })?;

        Ok(())
    }

    /// Point lookup by job id.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Apply a partial update inside a single-row transaction and return the
    /// updated record. No-op returning `None` when the job does not exist.
    pub async fn update_job(&self, job_id: &str, patch: JobPatch) -> Result<Option<JobRecord>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let mut record = row_to_record(&row)?;
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(completed_at) = patch.completed_at {
            record.completed_at = Some(completed_at);
        }
        if let Some(duration_ms) = patch.duration_ms {
            record.duration_ms = Some(duration_ms);
        }
        if let Some(n) = patch.documents_stored {
            record.documents_stored = Some(n);
        }
        if let Some(n) = patch.chunks_created {
            record.chunks_created = Some(n);
        }
        if let Some(n) = patch.embeddings_generated {
            record.embeddings_generated = Some(n);
        }
        if let Some(message) = patch.error_message {
            record.error_message = Some(message);
        }
        if let Some(stages) = patch.stages_completed {
            record.stages_completed = stages;
        }

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?2, completed_at = ?3, duration_ms = ?4,
                documents_stored = ?5, chunks_created = ?6,
                embeddings_generated = ?7, error_message = ?8,
                stages_completed = ?9
            WHERE job_id = ?1
            "#,
        )
        .bind(job_id)
        .bind(record.status.as_str())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(record.duration_ms)
        .bind(record.documents_stored)
        .bind(record.chunks_created)
        .bind(record.embeddings_generated)
        .bind(&record.error_message)
        .bind(serde_json::to_string(&record.stages_completed)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(record))
    }

    /// List jobs matching `filter`, newest first. `page` is 1-based.
    pub async fn list_jobs(&self, filter: &JobFilter, page: u32, page_size: u32) -> Result<JobPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) as i64 * page_size as i64;

        // Unset filter fields bind as empty strings, which short-circuit
        // their clause; this keeps the placeholder count constant.
        let where_clause = "WHERE (?1 = '' OR tenant_id = ?1) \
             AND (?2 = '' OR status = ?2) \
             AND (?3 = '' OR created_at >= ?3) \
             AND (?4 = '' OR created_at <= ?4)";

        let count_sql = format!("SELECT COUNT(*) AS n FROM jobs {where_clause}");
        let total: i64 = bind_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?
            .try_get("n")
            .map_err(Error::from)?;

        let page_sql = format!(
            "SELECT * FROM jobs {where_clause} ORDER BY created_at DESC LIMIT ?5 OFFSET ?6"
        );
        let rows = bind_filter(sqlx::query(&page_sql), filter)
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>>>()?;

        Ok(JobPage { records, total })
    }

    /// Check the store is reachable.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

fn bind_filter<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    filter: &JobFilter,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(filter.tenant_id.clone().unwrap_or_default())
        .bind(
            filter
                .status
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
        )
        .bind(
            filter
                .created_after
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        )
        .bind(
            filter
                .created_before
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        )
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("invalid timestamp '{raw}': {e}")))
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<JobRecord> {
    let source_str: String = row.try_get("source")?;
    let status_str: String = row.try_get("status")?;
    let created_at_str: String = row.try_get("created_at")?;
    let completed_at_str: Option<String> = row.try_get("completed_at")?;
    let stages_json: String = row.try_get("stages_completed")?;
    let params_json: String = row.try_get("source_params")?;
    let metadata_json: String = row.try_get("metadata")?;

    Ok(JobRecord {
        job_id: row.try_get("job_id")?,
        correlation_id: row.try_get("correlation_id")?,
        source: source_str
            .parse::<DocumentSource>()
            .map_err(|_| Error::Storage(format!("invalid source '{source_str}'")))?,
        status: JobStatus::from_str_lossy(&status_str),
        tenant_id: row.try_get("tenant_id")?,
        created_at: parse_timestamp(&created_at_str)?,
        completed_at: completed_at_str.as_deref().map(parse_timestamp).transpose()?,
        duration_ms: row.try_get("duration_ms")?,
        documents_stored: row.try_get("documents_stored")?,
        chunks_created: row.try_get("chunks_created")?,
        embeddings_generated: row.try_get("embeddings_generated")?,
        error_message: row.try_get("error_message")?,
        stages_completed: serde_json::from_str(&stages_json)?,
        source_params: serde_json::from_str(&params_json)?,
        metadata: serde_json::from_str(&metadata_json)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(job_id: &str, tenant: &str, status: JobStatus) -> JobRecord {
        let mut r = JobRecord::pending(
            job_id,
            DocumentSource::FileUpload,
            Some(tenant.to_string()),
            Some(format!("trace-{job_id}")),
            json!({"file_path": "/tmp/a.txt"}),
            json!({}),
        );
        r.status = status;
        r
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let store = JobStore::in_memory().await.unwrap();
        let rec = record("job-1", "tenant-a", JobStatus::Pending);
        store.create_job(&rec).await.unwrap();

        let loaded = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.job_id, "job-1");
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(loaded.source_params["file_path"], "/tmp/a.txt");
        assert!(store.get_job("job-nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_job_id_conflicts() {
        let store = JobStore::in_memory().await.unwrap();
        let rec = record("job-1", "tenant-a", JobStatus::Pending);
        store.create_job(&rec).await.unwrap();
        let err = store.create_job(&rec).await.unwrap_err();
        assert_eq!(err.kind(), "Conflict");
    }

    #[tokio::test]
    async fn update_applies_only_patched_fields() {
        let store = JobStore::in_memory().await.unwrap();
        store
            .create_job(&record("job-1", "tenant-a", JobStatus::Pending))
            .await
            .unwrap();

        let updated = store
            .update_job(
                "job-1",
                JobPatch {
                    status: Some(JobStatus::Fetching),
                    documents_stored: Some(2),
                    ..JobPatch::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, JobStatus::Fetching);
        assert_eq!(updated.documents_stored, Some(2));
        assert_eq!(updated.correlation_id.as_deref(), Some("trace-job-1"));
        assert!(updated.completed_at.is_none());

        // Missing job is a no-op, not an error.
        assert!(store
            .update_job("job-missing", JobPatch::status(JobStatus::Failed))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_filters_by_tenant() {
        let store = JobStore::in_memory().await.unwrap();
        for (id, tenant) in [("a1", "tenant-a"), ("a2", "tenant-a"), ("b1", "tenant-b")] {
            store
                .create_job(&record(id, tenant, JobStatus::Pending))
                .await
                .unwrap();
        }

        let page = store
            .list_jobs(
                &JobFilter {
                    tenant_id: Some("tenant-a".into()),
                    ..JobFilter::default()
                },
                1,
                50,
            )
            .await
            .unwrap();

        assert_eq!(page.total, 2);
        assert!(page
            .records
            .iter()
            .all(|r| r.tenant_id.as_deref() == Some("tenant-a")));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_paginates() {
        let store = JobStore::in_memory().await.unwrap();
        for i in 0..5 {
            let status = if i % 2 == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            store
                .create_job(&record(&format!("job-{i}"), "tenant-a", status))
                .await
                .unwrap();
        }

        let completed = store
            .list_jobs(
                &JobFilter {
                    status: Some(JobStatus::Completed),
                    ..JobFilter::default()
                },
                1,
                2,
            )
            .await
            .unwrap();
        assert_eq!(completed.total, 3);
        assert_eq!(completed.records.len(), 2);

        let second_page = store
            .list_jobs(
                &JobFilter {
                    status: Some(JobStatus::Completed),
                    ..JobFilter::default()
                },
                2,
                2,
            )
            .await
            .unwrap();
        assert_eq!(second_page.records.len(), 1);
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let store = JobStore::in_memory().await.unwrap();
        for i in 0..3 {
            let mut rec = record(&format!("job-{i}"), "tenant-a", JobStatus::Pending);
            rec.created_at = Utc::now() - chrono::Duration::seconds(100 - i);
            store.create_job(&rec).await.unwrap();
        }

        let page = store.list_jobs(&JobFilter::default(), 1, 10).await.unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["job-2", "job-1", "job-0"]);
    }

    #[tokio::test]
    async fn page_size_is_capped() {
        let store = JobStore::in_memory().await.unwrap();
        store
            .create_job(&record("job-1", "tenant-a", JobStatus::Pending))
            .await
            .unwrap();
        // A huge requested page size must not error; it is clamped.
        let page = store
            .list_jobs(&JobFilter::default(), 1, 1_000_000)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn health_check_reports_true() {
        let store = JobStore::in_memory().await.unwrap();
        assert!(store.health_check().await);
    }
}
