//! Backoff for calls to model servers. Only transient failures are retried:
//! transport errors and 5xx/429 responses. A rejected request or an
//! unreadable body fails on the first attempt.

use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Non-success HTTP status from a model server.
#[derive(Debug, Clone)]
pub struct StatusError {
    pub service: &'static str,
    pub status: StatusCode,
}

impl StatusError {
    pub fn new(service: &'static str, status: StatusCode) -> Self {
        Self { service, status }
    }

    pub fn is_transient(&self) -> bool {
        self.status.is_server_error() || self.status == StatusCode::TOO_MANY_REQUESTS
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} request failed: {}", self.service, self.status)
    }
}

impl std::error::Error for StatusError {}

/// Whether another attempt may succeed where `err` failed.
pub fn is_transient(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<StatusError>() {
            return e.is_transient();
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if let Some(status) = e.status() {
                return StatusError::new("http", status).is_transient();
            }
            return e.is_timeout() || e.is_connect() || e.is_request();
        }
    }
    false
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1000, 10000)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Run `f` until it succeeds, fails permanently, or retries run out.
    pub async fn retry<F, Fut, T>(&self, operation: &str, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let err = match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(operation, attempts = attempt + 1, "Call succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !is_transient(&err) {
                warn!(operation, error = %format!("{:#}", err), "Call failed permanently");
                return Err(err);
            }

            attempt += 1;
            if attempt > self.max_retries {
                warn!(operation, attempts = attempt, error = %format!("{:#}", err), "Retries exhausted");
                return Err(err);
            }

            warn!(
                operation,
                attempt,
                max_retries = self.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %format!("{:#}", err),
                "Transient failure, retrying"
            );
            sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, self.max_backoff);
        }
    }
}
