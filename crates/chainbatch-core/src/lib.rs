//! chainbatch-core — scheduling core for the range-aware block processor.
//!
//! # Architecture
//!
//! ```text
//! Registration[] → build_batches → merge_batches → Batch[] (schedule)
//!                                                     │
//!                      Ingester (chainbatch-ingest) ◀─┘
//!                          │  DataBatch (bounded channel)
//!                          ▼
//!                      Runner (chainbatch-processor)
//!                          ├── ChainCache       (decoder handle per runtime)
//!                          ├── HandlerSet       (dispatch per item)
//!                          ├── Store            (transaction per block, watermark)
//!                          └── Progress         (speed / ETA snapshots)
//! ```

pub mod abort;
pub mod batch;
pub mod chain;
pub mod config;
pub mod error;
pub mod handler;
pub mod heap;
pub mod progress;
pub mod range;
pub mod request;
pub mod selection;
pub mod store;
pub mod types;

pub use abort::AbortHandle;
pub use batch::{build_batches, merge_batches, schedule, Batch, DataBatch, Merge};
pub use chain::{ChainCache, ChainDecoder, ChainHandle, RawChain, RawDecoder};
pub use config::{ProcessorConfig, ProcessorState, RetryConfig};
pub use error::IndexerError;
pub use handler::{
    BlockHandler, CallHandler, EventHandler, GearMessageKind, HandlerContext, HandlerKind,
    HandlerSet, Registration,
};
pub use progress::{Progress, ProgressSnapshot, SpeedTracker};
pub use range::{Range, RangeEnd};
pub use request::DataRequest;
pub use selection::Selection;
pub use store::{Store, Transaction};
pub use types::{Block, BlockHeader, BlockItem, Call, Event, TopicFilter, TopicMatch};
