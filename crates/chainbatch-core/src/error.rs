//! Error types for the chainbatch pipeline.

use thiserror::Error;

/// Errors that can occur while scheduling, ingesting or processing blocks.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Invalid range: from {from} is greater than to {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("Failed to process block {height} ({hash}): {source}")]
    Block {
        height: u64,
        hash: String,
        #[source]
        source: Box<IndexerError>,
    },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for a handler failure.
    pub fn handler(handler: impl Into<String>, reason: impl ToString) -> Self {
        Self::Handler {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the error comes from archive I/O and the call may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if the error is the result of a cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Attach block context to an error raised while processing a block.
    pub fn at_block(self, height: u64, hash: impl Into<String>) -> Self {
        match self {
            // Already enriched, or a cancellation which carries no block context.
            e @ (Self::Block { .. } | Self::Aborted { .. }) => e,
            other => Self::Block {
                height,
                hash: hash.into(),
                source: Box::new(other),
            },
        }
    }
}
