//! Error types for the ingestion pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
///
/// Every stage and adapter funnels into this taxonomy. The orchestrator maps
/// the variant to the terminal job status; the retry executor consults
/// [`Error::is_retryable`] to decide whether another attempt is worthwhile.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any I/O was performed
    #[error("Validation error: {0}")]
    Validation(String),

    /// External resource does not exist (unknown ticker, missing file, 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Policy denial: robots.txt disallow, read-only violation, 401/403
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Upstream throttling (HTTP 429 or provider backpressure)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transient failure: network timeout, 5xx, temporary database error
    #[error("Transient error: {0}")]
    Transient(String),

    /// Response or file exceeds a configured cap
    #[error("Size exceeded: {0}")]
    SizeExceeded(String),

    /// A record with the same identity already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cancellation signal observed
    #[error("Cancelled")]
    Cancelled,

    /// Job store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything unclassified
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Taxonomy label, used as the first sentence of a job's `error_message`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFound",
            Self::Forbidden(_) => "Forbidden",
            Self::RateLimited(_) => "RateLimited",
            Self::Transient(_) => "Transient",
            Self::SizeExceeded(_) => "SizeExceeded",
            Self::Conflict(_) => "Conflict",
            Self::Cancelled => "Cancelled",
            Self::Storage(_) => "Storage",
            Self::Config(_) => "ConfigError",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether the retry executor should attempt the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }

    /// Render the message the job record carries: kind first, detail after.
    pub fn job_message(&self) -> String {
        format!("{}. {}", self.kind(), self)
    }

    /// Classify an HTTP status from an upstream service.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        match status.as_u16() {
            404 => Self::NotFound(format!("{context}: HTTP 404")),
            401 | 403 => Self::Forbidden(format!("{context}: HTTP {status}")),
            429 => Self::RateLimited(format!("{context}: HTTP 429")),
            s if s >= 500 => Self::Transient(format!("{context}: HTTP {status}")),
            _ => Self::Internal(format!("{context}: HTTP {status}")),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(err.to_string()),
            std::io::ErrorKind::TimedOut => Error::Transient(err.to_string()),
            _ => Error::Internal(format!("IO error: {err}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON error: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return Error::Transient(format!("HTTP request error: {err}"));
        }
        if let Some(status) = err.status() {
            return Error::from_status(status, "HTTP request");
        }
        Error::Internal(format!("HTTP request error: {err}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(db.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Error::Transient(format!("Database error: {err}"))
            }
            _ => Error::Storage(format!("Database error: {err}")),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::SizeExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Transient(_) => StatusCode::BAD_GATEWAY,
            Error::Cancelled | Error::Storage(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::RateLimited("429".into()).is_retryable());
        assert!(Error::Transient("timeout".into()).is_retryable());
        assert!(!Error::Validation("bad input".into()).is_retryable());
        assert!(!Error::Forbidden("robots".into()).is_retryable());
        assert!(!Error::NotFound("missing".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::NOT_FOUND, "x"),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "x"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::BAD_GATEWAY, "x"),
            Error::Transient(_)
        ));
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::UNAUTHORIZED, "x"),
            Error::Forbidden(_)
        ));
    }

    #[test]
    fn job_message_leads_with_kind() {
        let msg = Error::Forbidden("robots.txt disallows /admin".into()).job_message();
        assert!(msg.starts_with("Forbidden."));
        assert!(msg.contains("/admin"));
    }
}
