//! Exponential backoff for the transfer phase.

use std::future::Future;
use std::time::Duration;

use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::ports::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retry_attempts: u32,
    pub base: Duration,
    /// Ceiling for one attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_retry_attempts: settings.max_retry_attempts,
            base: settings.retry_base,
            timeout: settings.transfer_timeout,
        }
    }

    /// Wait before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// `op` receives the 1-based attempt number. Each attempt is bounded by
    /// `timeout`; an elapsed attempt counts as [`TransportError::Timeout`].
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let attempts = self.max_retry_attempts.saturating_add(1);
        let mut attempt = 1;

        loop {
            let err = match tokio::time::timeout(self.timeout, op(attempt)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => TransportError::Timeout(
                    u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                ),
            };

            if !err.is_retryable() || attempt >= attempts {
                tracing::error!(what, attempt, error = %err, "Transfer failed permanently");
                return Err(SyncError::Transport {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.delay(attempt);
            tracing::warn!(
                what,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "Transfer attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
