//! Bounded retry with linear backoff for backend calls.
//!
//! Every attempt runs under a per-attempt timeout. Attempt `i` (0-based)
//! that fails waits `backoff * (i + 1)` before the next one.

use companion_core::error::GenerationError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(350),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &companion_config::BackendConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// No retries; one attempt with the given timeout.
    pub fn once(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
            timeout,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(&self, backend: &str, mut op: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(format!(
                    "{backend} did not answer within {}s",
                    self.timeout.as_secs()
                ))),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= attempts || !err.is_retryable() {
                warn!(backend, attempts = attempt, error = %err, "Backend call failed");
                return Err(err);
            }

            let wait = self.backoff * attempt;
            debug!(backend, attempt, wait_ms = wait.as_millis() as u64, error = %err, "Retrying backend call");
            tokio::time::sleep(wait).await;
        }
    }
}
