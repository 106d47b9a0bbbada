//! The runner — strictly sequential consumer of fetched batches.
//!
//! For every block of a [`DataBatch`], in height order:
//!   1. Resolve the chain handle for the block's runtime
//!   2. Open a store transaction scoped to the block
//!   3. Run pre hooks, dispatch every item, run post hooks
//!   4. Commit (which moves the watermark to the block)
//!
//! A batch whose range extends past its last block moves the watermark to the
//! end of the range directly: those heights hold no matching data.

use std::sync::Arc;

use tokio::sync::mpsc;

use chainbatch_core::abort::AbortHandle;
use chainbatch_core::batch::DataBatch;
use chainbatch_core::chain::{ChainCache, ChainDecoder};
use chainbatch_core::error::IndexerError;
use chainbatch_core::handler::{HandlerContext, HandlerSet};
use chainbatch_core::progress::Progress;
use chainbatch_core::store::Store;
use chainbatch_core::types::{Block, BlockItem};

pub struct Runner<S, D> {
    store: S,
    chain: ChainCache<D>,
    abort: AbortHandle,
    progress: Arc<Progress>,
    /// Watermark: last height whose effects are committed.
    last_processed: Option<u64>,
}

impl<S: Store, D: ChainDecoder> Runner<S, D> {
    pub fn new(
        store: S,
        decoder: D,
        abort: AbortHandle,
        progress: Arc<Progress>,
        watermark: Option<u64>,
    ) -> Self {
        Self {
            store,
            chain: ChainCache::new(decoder),
            abort,
            progress,
            last_processed: watermark,
        }
    }

    pub fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    /// Consume batches until the producer closes the channel.
    pub async fn run(&mut self, rx: &mut mpsc::Receiver<DataBatch>) -> Result<(), IndexerError> {
        while let Some(batch) = self.abort.guard(rx.recv()).await? {
            self.process_batch(&batch).await?;
        }
        tracing::info!(last_processed = ?self.last_processed, "Runner drained all batches");
        Ok(())
    }

    pub async fn process_batch(&mut self, batch: &DataBatch) -> Result<(), IndexerError> {
        let started_at = self.last_processed;
        for block in &batch.blocks {
            self.abort.check()?;
            let height = block.height();
            if let Some(last) = self.last_processed {
                if height <= last {
                    return Err(IndexerError::Invariant(format!(
                        "block {height} received after block {last}"
                    )));
                }
            }
            self.process_block(&batch.handlers, block)
                .await
                .map_err(|e| e.at_block(height, block.header.hash.clone()))?;
            self.last_processed = Some(height);
        }

        let to = batch.to();
        if self.last_processed.map_or(true, |last| to > last) {
            self.store.advance(to).await?;
            tracing::debug!(from = batch.range.from, to, "Advanced watermark over empty range");
            self.last_processed = Some(to);
        }

        let covered = match started_at {
            Some(prev) => to.saturating_sub(prev),
            None => to + 1 - batch.range.from.min(to),
        };
        self.progress.record_mapping(covered, to);
        let snapshot = self.progress.snapshot();
        tracing::info!(
            from = batch.range.from,
            to,
            blocks = batch.blocks.len(),
            speed = format!("{:.1}", snapshot.mapping_speed),
            sync = format!("{:.2}%", snapshot.sync_ratio * 100.0),
            eta_secs = ?snapshot.eta_secs,
            "Processed batch"
        );
        Ok(())
    }

    async fn process_block(
        &mut self,
        handlers: &HandlerSet,
        block: &Block,
    ) -> Result<(), IndexerError> {
        let chain = self.chain.for_block(&block.header).await?;
        let mut tx = self.store.begin(block.height()).await?;
        {
            let mut ctx = HandlerContext {
                block: &block.header,
                chain: chain.as_ref(),
                store: &mut *tx,
            };
            for hook in &handlers.pre {
                hook.handle(&mut ctx).await?;
            }
            for item in &block.items {
                match item {
                    BlockItem::Event(event) => {
                        for handler in handlers.event_handlers_for(event) {
                            handler.handle(event, &mut ctx).await?;
                        }
                    }
                    BlockItem::Call(call) => {
                        for handler in handlers.call_handlers_for(call) {
                            handler.handle(call, &mut ctx).await?;
                        }
                    }
                }
            }
            for hook in &handlers.post {
                hook.handle(&mut ctx).await?;
            }
        }
        // Dropping `tx` on any early return above discards the block's writes.
        tx.commit().await
    }
}
