//! Bounded retries for store writes

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::StorageResult;
use crate::error::MonitorError;

/// Attempts and initial backoff for store writes; the backoff doubles per retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Run `write` until it succeeds or the attempts are used up
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut write: F,
    ) -> Result<T, MonitorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut backoff = self.backoff;
        let mut attempt = 1;

        loop {
            match write().await {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= attempts => {
                    return Err(MonitorError::StoreWriteFailure {
                        operation,
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        "{operation} failed (attempt {attempt}/{attempts}), retrying in {backoff:?}: {e}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }
}
