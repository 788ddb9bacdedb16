//! Retry with exponential backoff for transient RPC failures

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Retry configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff after the first failure
    pub initial_backoff: Duration,
    /// Upper bound on any single backoff
    pub max_backoff: Duration,
    /// Backoff multiplier between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with `attempts` total attempts starting at `initial_backoff`
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: attempts.max(1),
            initial_backoff,
            ..Default::default()
        }
    }

    /// Calculate backoff for attempt number (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32)) as u64;
        Duration::from_millis(backoff_ms).min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted
    pub async fn execute<T, E, F, Fut, R>(&self, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < attempts && retryable(&err) => {
                    let backoff = self.backoff_for_attempt(attempt);
                    debug!(attempt, ?backoff, error = %err, "retrying after transient failure");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
