//! Bounded exponential backoff for outbound operations

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Retry policy with exponential backoff and jitter.
///
/// Only errors classified retryable by [`Error::is_retryable`] trigger
/// another attempt; `Internal` gets exactly one extra attempt. Cancellation
/// aborts both the operation and any backoff sleep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_secs_f64(cfg.initial_delay_secs),
            multiplier: cfg.multiplier,
            max_delay: Duration::from_secs_f64(cfg.max_delay_secs),
            jitter: cfg.jitter,
        }
    }

    /// Delay before the retry that follows attempt number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());
        let jittered = capped + capped * self.jitter * rand::thread_rng().gen::<f64>();
        Duration::from_secs_f64(jittered)
    }

    /// Run `op` until it succeeds, exhausts its attempts, or is cancelled.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut internal_retried = false;

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retryable = err.is_retryable()
                || (matches!(err, Error::Internal(_)) && !internal_retried);
            if !retryable || attempt == self.max_attempts {
                return Err(err);
            }
            if matches!(err, Error::Internal(_)) {
                internal_retried = true;
            }

            let delay = self.backoff(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "operation failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Err(Error::internal("retry loop exited without a result"))
    }
}
