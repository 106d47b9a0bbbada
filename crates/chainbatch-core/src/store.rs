//! Store collaborator — the user's data store plus the progress watermark.
//!
//! The watermark is the height of the last block whose handler effects are
//! committed. On restart the processor resumes from `watermark + 1`.
//!
//! Implementations: `MemoryStore` and `SqliteStore` in `chainbatch-storage`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::IndexerError;

/// A transactional store with a monotonic height watermark.
#[async_trait]
pub trait Store: Send + Sync {
    /// Prepare the store and return the current watermark (`None` = nothing committed).
    async fn connect(&self) -> Result<Option<u64>, IndexerError>;

    /// Open a transaction scoped to the block at `height`.
    ///
    /// Dropping the transaction without calling [`Transaction::commit`] discards it.
    async fn begin(&self, height: u64) -> Result<Box<dyn Transaction>, IndexerError>;

    /// Move the watermark to `height` without writing any entities.
    ///
    /// Used to skip ranges that are known to contain no matching data.
    /// Must never move the watermark backwards.
    async fn advance(&self, height: u64) -> Result<(), IndexerError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn connect(&self) -> Result<Option<u64>, IndexerError> {
        (**self).connect().await
    }

    async fn begin(&self, height: u64) -> Result<Box<dyn Transaction>, IndexerError> {
        (**self).begin(height).await
    }

    async fn advance(&self, height: u64) -> Result<(), IndexerError> {
        (**self).advance(height).await
    }
}

/// Writes of a single block, applied atomically on commit.
#[async_trait]
pub trait Transaction: Send {
    /// Height the transaction is scoped to.
    fn height(&self) -> u64;

    async fn get(&mut self, entity: &str, id: &str) -> Result<Option<Value>, IndexerError>;

    async fn upsert(&mut self, entity: &str, id: &str, value: Value) -> Result<(), IndexerError>;

    async fn remove(&mut self, entity: &str, id: &str) -> Result<(), IndexerError>;

    /// Apply all writes and move the watermark to [`Transaction::height`].
    async fn commit(self: Box<Self>) -> Result<(), IndexerError>;
}
