//! Processor — wires the ingester and the runner together.
//!
//! ```text
//! store.connect() ──▶ watermark ──▶ schedule(registrations, range ∩ {from: watermark+1})
//!                                          │
//!            tokio::spawn(Ingester) ──▶ mpsc(channel_capacity) ──▶ Runner (this task)
//! ```
//!
//! A runner failure aborts the ingester. A producer failure closes the
//! channel; the runner drains what was published and the producer's error is
//! returned.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use chainbatch_core::abort::AbortHandle;
use chainbatch_core::batch::{schedule, Batch};
use chainbatch_core::chain::ChainDecoder;
use chainbatch_core::config::{ProcessorConfig, ProcessorState};
use chainbatch_core::error::IndexerError;
use chainbatch_core::handler::Registration;
use chainbatch_core::progress::{Progress, ProgressSnapshot};
use chainbatch_core::range::Range;
use chainbatch_core::store::Store;
use chainbatch_ingest::archive::ArchiveClient;
use chainbatch_ingest::pipeline::{IngestConfig, Ingester};

use crate::runner::Runner;

/// A configured, immutable block processor. Create one with
/// [`ProcessorBuilder`](crate::ProcessorBuilder).
pub struct Processor {
    config: ProcessorConfig,
    registrations: Vec<Registration>,
    abort: AbortHandle,
    progress: Arc<Progress>,
    state: Mutex<ProcessorState>,
}

impl Processor {
    pub(crate) fn new(config: ProcessorConfig, registrations: Vec<Registration>) -> Self {
        Self {
            config,
            registrations,
            abort: AbortHandle::new(),
            progress: Arc::new(Progress::new()),
            state: Mutex::new(ProcessorState::Idle),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Handle to stop a running processor.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ProcessorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// The schedule left to process above `watermark`.
    pub fn plan(&self, watermark: Option<u64>) -> Result<Vec<Batch>, IndexerError> {
        let global = self.config.range.unwrap_or_default();
        let bound = match watermark {
            Some(w) => match global.intersection(&Range::from(w.saturating_add(1))) {
                Some(bound) => bound,
                None => return Ok(Vec::new()),
            },
            None => global,
        };
        schedule(&self.registrations, Some(&bound))
    }

    /// Process the schedule to completion.
    ///
    /// Returns `Ok(())` once every batch is processed, or when stopped through
    /// [`Processor::abort_handle`]. With an open-ended range this only returns
    /// on error or abort.
    pub async fn run<A, S, D>(&self, archive: A, store: S, decoder: D) -> Result<(), IndexerError>
    where
        A: ArchiveClient + 'static,
        S: Store,
        D: ChainDecoder,
    {
        self.set_state(ProcessorState::Running);
        let result = self.run_inner(archive, store, decoder).await;
        let state = match &result {
            Ok(()) => ProcessorState::Finished,
            Err(e) if e.is_aborted() => ProcessorState::Stopping,
            Err(_) => ProcessorState::Error,
        };
        self.set_state(state);
        match result {
            Err(e) if e.is_aborted() && self.abort.is_aborted() => {
                tracing::info!(id = %self.config.id, error = %e, "Processor stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!(id = %self.config.id, error = %e, "Processor failed");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    async fn run_inner<A, S, D>(&self, archive: A, store: S, decoder: D) -> Result<(), IndexerError>
    where
        A: ArchiveClient + 'static,
        S: Store,
        D: ChainDecoder,
    {
        let watermark = store.connect().await?;
        if let Some(w) = watermark {
            tracing::info!(id = %self.config.id, watermark = w, "Resuming from watermark");
            self.progress.set_last_processed(w);
        }

        let batches = self.plan(watermark)?;
        if batches.is_empty() {
            tracing::info!(id = %self.config.id, "Nothing to process");
            return Ok(());
        }
        tracing::info!(
            id = %self.config.id,
            chain = %self.config.chain,
            batches = batches.len(),
            first = batches[0].range.from,
            "Starting processor"
        );

        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity);
        let ingester = Ingester::new(
            archive,
            batches,
            IngestConfig::from_processor(&self.config),
            self.abort.clone(),
            Arc::clone(&self.progress),
        );
        let producer = tokio::spawn(ingester.run(tx));

        let progress = Arc::clone(&self.progress);
        let mut runner = Runner::new(store, decoder, self.abort.clone(), progress, watermark);
        if let Err(e) = runner.run(&mut rx).await {
            if !e.is_aborted() {
                self.abort.abort(e.to_string());
            }
            // The producer only observes the abort; its outcome adds nothing.
            let _ = producer.await;
            return Err(e);
        }

        match producer.await {
            Ok(Ok(())) => {
                tracing::info!(
                    id = %self.config.id,
                    last_processed = ?runner.last_processed(),
                    "Processor finished"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(join) => Err(IndexerError::Other(format!("ingester task failed: {join}"))),
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("config", &self.config)
            .field("registrations", &self.registrations.len())
            .field("state", &self.state())
            .finish()
    }
}
