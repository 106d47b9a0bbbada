//! Fluent builder API for creating processors.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainbatch_core::{EventHandler, HandlerContext, IndexerError, Event, Range, Registration};
//! use chainbatch_processor::ProcessorBuilder;
//!
//! struct Transfers;
//!
//! #[async_trait::async_trait]
//! impl EventHandler for Transfers {
//!     async fn handle(&self, _: &Event, _: &mut HandlerContext<'_>) -> Result<(), IndexerError> {
//!         Ok(())
//!     }
//! }
//!
//! let processor = ProcessorBuilder::new()
//!     .id("kusama-transfers")
//!     .chain("kusama")
//!     .range(Range::from(1_000_000))
//!     .batch_size(500)
//!     .add_event_handler("Balances.Transfer", Transfers)
//!     .add(
//!         Registration::event("Balances.Deposit", Arc::new(Transfers))
//!             .with_range(Range::from(2_000_000)),
//!     )
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

use chainbatch_core::config::{ProcessorConfig, RetryConfig};
use chainbatch_core::error::IndexerError;
use chainbatch_core::handler::{
    BlockHandler, CallHandler, EventHandler, GearMessageKind, Registration,
};
use chainbatch_core::range::Range;
use chainbatch_core::types::TopicFilter;

use crate::processor::Processor;

/// Fluent builder for a [`Processor`].
///
/// Configuration and registrations can only change here; [`ProcessorBuilder::build`]
/// consumes the builder and the resulting processor is immutable.
#[derive(Default)]
pub struct ProcessorBuilder {
    config: ProcessorConfig,
    registrations: Vec<Registration>,
}

impl ProcessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config (e.g. loaded from JSON).
    pub fn with_config(config: ProcessorConfig) -> Self {
        Self {
            config,
            registrations: Vec::new(),
        }
    }

    /// Set the processor ID (used in logs and as the store key).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the chain name.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Restrict every handler to `range`.
    pub fn range(mut self, range: Range) -> Self {
        self.config.range = Some(range);
        self
    }

    /// Set the maximum number of blocks per archive request.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the archive height polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set how many fetched batches may wait for the runner.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Register a handler with full control over range and selection.
    pub fn add(mut self, registration: Registration) -> Self {
        self.registrations.push(registration);
        self
    }

    pub fn add_pre_hook(self, handler: impl BlockHandler + 'static) -> Self {
        self.add(Registration::pre(Arc::new(handler)))
    }

    pub fn add_post_hook(self, handler: impl BlockHandler + 'static) -> Self {
        self.add(Registration::post(Arc::new(handler)))
    }

    /// Handle events named `name` (`"*"` for every event).
    pub fn add_event_handler(
        self,
        name: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.add(Registration::event(name, Arc::new(handler)))
    }

    /// Handle successful calls named `name` (`"*"` for every call).
    pub fn add_call_handler(
        self,
        name: impl Into<String>,
        handler: impl CallHandler + 'static,
    ) -> Self {
        self.add(Registration::call(name, Arc::new(handler)))
    }

    /// Handle EVM logs emitted by `contract`, optionally filtered by topics.
    pub fn add_evm_log_handler(
        self,
        contract: impl Into<String>,
        filter: Option<TopicFilter>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.add(Registration::evm_log(contract, filter, Arc::new(handler)))
    }

    /// Handle `Contracts.ContractEmitted` events of `contract`.
    pub fn add_contract_event_handler(
        self,
        contract: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.add(Registration::contract_event(contract, Arc::new(handler)))
    }

    /// Handle gear messages of `kind` for `program_id`.
    pub fn add_gear_handler(
        self,
        kind: GearMessageKind,
        program_id: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.add(Registration::gear_message(kind, program_id, Arc::new(handler)))
    }

    /// Validate and freeze the processor.
    pub fn build(self) -> Result<Processor, IndexerError> {
        self.config.validate()?;
        for registration in &self.registrations {
            if let Some(range) = &registration.range {
                range.validate()?;
            }
        }
        if self.registrations.is_empty() {
            tracing::warn!(id = %self.config.id, "Processor built without handlers");
        }
        Ok(Processor::new(self.config, self.registrations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainbatch_core::handler::HandlerContext;
    use chainbatch_core::types::Event;

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _: &Event, _: &mut HandlerContext<'_>) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    #[test]
    fn builder_defaults() {
        let processor = ProcessorBuilder::new().build().unwrap();
        let cfg = processor.config();
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.channel_capacity, 3);
        assert_eq!(cfg.poll_interval_ms, 2000);
        assert!(cfg.range.is_none());
    }

    #[test]
    fn builder_custom() {
        let processor = ProcessorBuilder::new()
            .id("transfers")
            .chain("kusama")
            .range(Range::new(10, 20).unwrap())
            .batch_size(5)
            .channel_capacity(1)
            .add_event_handler("Balances.Transfer", Noop)
            .add_contract_event_handler("0xABC", Noop)
            .build()
            .unwrap();

        assert_eq!(processor.config().id, "transfers");
        assert_eq!(processor.config().batch_size, 5);
        assert_eq!(processor.registrations().len(), 2);
    }

    #[test]
    fn build_rejects_bad_config_and_ranges() {
        assert!(matches!(
            ProcessorBuilder::new().batch_size(0).build(),
            Err(IndexerError::Config(_))
        ));

        let inverted = Range { from: 9, to: Some(3) };
        let bad = Registration::event("A", Arc::new(Noop)).with_range(inverted);
        assert!(matches!(
            ProcessorBuilder::new().add(bad).build(),
            Err(IndexerError::InvalidRange { from: 9, to: 3 })
        ));
    }
}
