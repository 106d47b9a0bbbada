//! The ingestion pipeline: streams blocks for the schedule out of the archive.
//!
//! For the batch at the head of the queue:
//!   1. Wait until the archive height reaches `batch.range.from`
//!   2. Fetch `[from, min(archive height, batch end)]`, at most `batch_size` blocks
//!   3. Shrink the batch (limit hit, or archive behind) or pop it (fully fetched)
//!   4. Publish the `DataBatch`; `send` suspends while the channel is full
//!
//! Dropping the sender when the queue is exhausted closes the channel, which
//! is how the runner learns there is nothing more to come.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use chainbatch_core::abort::AbortHandle;
use chainbatch_core::batch::{Batch, DataBatch};
use chainbatch_core::config::ProcessorConfig;
use chainbatch_core::error::IndexerError;
use chainbatch_core::progress::Progress;
use chainbatch_core::range::{Range, RangeEnd};
use chainbatch_core::types::Block;

use crate::archive::ArchiveClient;
use crate::retry::RetryPolicy;

/// Settings for the ingester.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum number of blocks per fetch.
    pub batch_size: usize,
    /// Delay between archive height polls while waiting for the chain to grow.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl IngestConfig {
    pub fn from_processor(config: &ProcessorConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            retry: RetryPolicy::new(config.retry.clone()),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from_processor(&ProcessorConfig::default())
    }
}

/// Producer side of the pipeline.
pub struct Ingester<A> {
    archive: A,
    queue: VecDeque<Batch>,
    config: IngestConfig,
    abort: AbortHandle,
    progress: Arc<Progress>,
}

impl<A: ArchiveClient> Ingester<A> {
    pub fn new(
        archive: A,
        schedule: Vec<Batch>,
        config: IngestConfig,
        abort: AbortHandle,
        progress: Arc<Progress>,
    ) -> Self {
        Self {
            archive,
            queue: schedule.into(),
            config,
            abort,
            progress,
        }
    }

    /// Batches not yet fully fetched. The head may have been shrunk.
    pub fn pending(&self) -> &VecDeque<Batch> {
        &self.queue
    }

    /// Publish every batch of the schedule onto `tx`.
    ///
    /// Returns when the schedule is exhausted (closing the channel), on a
    /// fatal error, or on abort.
    pub async fn run(mut self, tx: mpsc::Sender<DataBatch>) -> Result<(), IndexerError> {
        tracing::info!(batches = self.queue.len(), "Ingestion started");
        while let Some(data) = self.next_batch().await? {
            let (from, to, blocks) = (data.range.from, data.to(), data.blocks.len());
            self.abort
                .guard(tx.send(data))
                .await?
                .map_err(|_| IndexerError::Other("data batch receiver dropped".into()))?;
            tracing::debug!(from, to, blocks, "Published data batch");
        }
        tracing::info!("Ingestion complete");
        Ok(())
    }

    /// Fetch the next pass over the head batch, or `None` once the queue is empty.
    ///
    /// The head is popped when fully fetched. Otherwise it is shrunk to start
    /// right after the last height this pass covers.
    pub async fn next_batch(&mut self) -> Result<Option<DataBatch>, IndexerError> {
        self.abort.check()?;
        let Some(head) = self.queue.front() else {
            return Ok(None);
        };
        let from = head.range.from;
        let end = head.range.end();
        let handlers = head.handlers.clone();
        let request = handlers.data_request();

        let archive_height = self.wait_for_height(from).await?;
        let to = match end {
            RangeEnd::Height(e) => e.min(archive_height),
            RangeEnd::Unbounded => archive_height,
        };
        let fetch_range = Range { from, to: Some(to) };
        let limit = self.config.batch_size;

        let started = Instant::now();
        let archive = &self.archive;
        let request = &request;
        let blocks = self
            .config
            .retry
            .run("fetch", &self.abort, move || archive.fetch(fetch_range, limit, request))
            .await?;
        let elapsed = started.elapsed();
        check_blocks(&fetch_range, &blocks)?;

        let last = blocks.last().map(|b| b.height());
        let covered_to = match last {
            // Limit hit before the batch end: more data may follow `last`.
            Some(last) if blocks.len() >= limit && end.is_above(last) => {
                self.shrink_head(last + 1);
                last
            }
            _ if end.is_above(archive_height) => {
                self.shrink_head(archive_height + 1);
                archive_height
            }
            _ => {
                self.queue.pop_front();
                to
            }
        };

        self.progress.record_ingest(blocks.len() as u64, elapsed);
        tracing::debug!(
            from,
            to = covered_to,
            blocks = blocks.len(),
            archive_height,
            fetch_ms = elapsed.as_millis() as u64,
            "Fetched blocks"
        );

        Ok(Some(DataBatch {
            range: Range {
                from,
                to: Some(covered_to),
            },
            blocks,
            handlers,
        }))
    }

    /// Poll the archive until its height reaches `target`, returning that height.
    async fn wait_for_height(&self, target: u64) -> Result<u64, IndexerError> {
        let mut logged = false;
        loop {
            self.abort.check()?;
            let archive = &self.archive;
            let height = self
                .config
                .retry
                .run("height", &self.abort, move || archive.height())
                .await?;
            self.progress.set_chain_height(height);
            if height >= target {
                return Ok(height);
            }
            if !logged {
                tracing::info!(height, target, "Waiting for archive to reach height");
                logged = true;
            }
            self.abort.sleep(self.config.poll_interval).await?;
        }
    }

    fn shrink_head(&mut self, from: u64) {
        if let Some(head) = self.queue.front_mut() {
            head.range.from = from;
        }
    }
}

/// Blocks must be strictly ascending and inside the requested range.
fn check_blocks(range: &Range, blocks: &[Block]) -> Result<(), IndexerError> {
    let mut prev: Option<u64> = None;
    for block in blocks {
        let height = block.height();
        if !range.contains(height) {
            return Err(IndexerError::Invariant(format!(
                "archive returned block {height} outside of {range}"
            )));
        }
        if prev.map_or(false, |p| height <= p) {
            return Err(IndexerError::Invariant(format!(
                "archive returned block {height} out of order"
            )));
        }
        prev = Some(height);
    }
    Ok(())
}
