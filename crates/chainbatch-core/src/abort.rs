//! Cooperative cancellation shared by the ingester and the runner.
//!
//! Every suspension point (archive poll sleep, fetch, channel send/receive)
//! goes through [`AbortHandle::guard`], which fails with
//! [`IndexerError::Aborted`] as soon as [`AbortHandle::abort`] is called.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::IndexerError;

/// Clonable abort handle carrying a one-shot reason.
#[derive(Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort with `reason`. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The error every waiter observes after an abort.
    pub fn error(&self) -> IndexerError {
        IndexerError::Aborted {
            reason: self.reason.get().cloned().unwrap_or_else(|| "aborted".into()),
        }
    }

    /// `Err` if aborted. Checked at loop iteration boundaries.
    pub fn check(&self) -> Result<(), IndexerError> {
        if self.is_aborted() {
            Err(self.error())
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless aborted first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, IndexerError> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.error()),
            out = fut => Ok(out),
        }
    }

    /// Abortable sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), IndexerError> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason.get())
            .finish()
    }
}
