//! HTTP server for the ingestion pipeline

pub mod routes;
pub mod state;

use std::net::SocketAddr;

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::SiftConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Ingestion HTTP server
pub struct Server {
    config: SiftConfig,
    state: AppState,
}

impl Server {
    pub async fn new(config: SiftConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn cors_layer(&self) -> CorsLayer {
        if self.config.server.allowed_origins.is_empty() {
            return CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
        }
        let origins: Vec<HeaderValue> = self
            .config
            .server
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness))
            .nest("/api", routes::api_routes())
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(self.cors_layer())
    }

    /// Bind and serve until shutdown.
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {e}")))?;

        let router = self.build_router();
        tracing::info!("listening on http://{addr}");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received");
            })
            .await
            .map_err(|e| Error::internal(format!("server error: {e}")))?;

        self.state.shutdown().await;
        Ok(())
    }
}

/// Liveness plus a job-store probe
async fn health_check(
    state: axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<serde_json::Value>) {
    let store_ok = state.jobs().health_check().await;
    let status = if store_ok {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        axum::Json(serde_json::json!({
            "status": if store_ok { "ok" } else { "degraded" },
            "job_store": store_ok,
        })),
    )
}

async fn readiness() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_server() -> Server {
        let mut config = SiftConfig::default();
        config.storage.database_url = "sqlite::memory:".into();
        config.storage.pool_size = 1;
        config.processing.max_workers = 2;
        Server::new(config).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_job_store() {
        let server = test_server().await;
        let router = server.build_router();

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["job_store"], true);
    }

    #[tokio::test]
    async fn submission_with_unknown_source_is_rejected() {
        let server = test_server().await;
        let router = server.build_router();

        let response = router
            .oneshot(
                Request::post("/api/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"source": "carrier_pigeon"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "ValidationError");
    }

    #[tokio::test]
    async fn submission_with_missing_fields_is_rejected_before_create() {
        let server = test_server().await;
        let router = server.build_router();

        // database_query without a connection string never reaches the store.
        let response = router
            .oneshot(
                Request::post("/api/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"source": "database_query", "query": "SELECT 1"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let page = server
            .state()
            .jobs()
            .list_jobs(&Default::default(), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn valid_submission_is_accepted_and_persisted() {
        let server = test_server().await;
        let router = server.build_router();

        let response = router
            .oneshot(
                Request::post("/api/jobs")
                    .header("content-type", "application/json")
                    .header("x-tenant-id", "tenant-a")
                    .body(Body::from(
                        json!({
                            "source": "file_upload",
                            "file_path": "/tmp/definitely-not-here-1b3f.txt",
                            "correlation_id": "trace-9"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        let job_id = body["job_id"].as_str().unwrap().to_string();
        assert_eq!(body["correlation_id"], "trace-9");
        assert!(job_id.starts_with("job-"));

        let record = server
            .state()
            .jobs()
            .get_job(&job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(record.source_params["file_path"], "/tmp/definitely-not-here-1b3f.txt");
    }

    #[tokio::test]
    async fn missing_job_is_404() {
        let server = test_server().await;
        let router = server.build_router();

        let response = router
            .oneshot(
                Request::get("/api/jobs/job-nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_filters_by_tenant_header() {
        let server = test_server().await;

        for (job, tenant) in [("job-a", "tenant-a"), ("job-b", "tenant-b")] {
            let record = crate::types::JobRecord::pending(
                job,
                crate::types::DocumentSource::FileUpload,
                Some(tenant.to_string()),
                None,
                json!({"file_path": "/tmp/x"}),
                json!({}),
            );
            server.state().jobs().create_job(&record).await.unwrap();
        }

        let router = server.build_router();
        let response = router
            .oneshot(
                Request::get("/api/jobs")
                    .header("x-tenant-id", "tenant-a")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["jobs"][0]["tenant_id"], "tenant-a");
    }

    #[tokio::test]
    async fn cancelling_a_finished_job_conflicts() {
        let server = test_server().await;

        let mut record = crate::types::JobRecord::pending(
            "job-done",
            crate::types::DocumentSource::FileUpload,
            None,
            None,
            json!({"file_path": "/tmp/x"}),
            json!({}),
        );
        record.status = crate::types::JobStatus::Completed;
        server.state().jobs().create_job(&record).await.unwrap();

        let router = server.build_router();
        let response = router
            .oneshot(
                Request::post("/api/jobs/job-done/cancel")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
