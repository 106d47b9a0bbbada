//! Exponential backoff for transient archive errors.

use std::future::Future;
use std::time::Duration;

use chainbatch_core::abort::AbortHandle;
use chainbatch_core::config::RetryConfig;
use chainbatch_core::error::IndexerError;

/// Stateless retry policy. Computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let growth = self.config.multiplier.powi((attempt - 1) as i32);
        let base_ms = self.config.initial_backoff_ms as f64 * growth;
        let capped = base_ms.min(self.config.max_backoff_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, runs out
    /// of retries, or `abort` fires. Backoff sleeps are abortable.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        abort: &AbortHandle,
        mut op: F,
    ) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0u32;
        loop {
            match abort.guard(op()).await? {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    let Some(delay) = self.next_delay(attempt) else {
                        tracing::error!(
                            what,
                            attempts = attempt,
                            error = %err,
                            "Giving up after retries"
                        );
                        return Err(err);
                    };
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Archive request failed, retrying"
                    );
                    abort.sleep(delay).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
