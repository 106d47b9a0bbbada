//! chainbatch-ingest — producer side of the block processor.
//!
//! Turns the schedule into a stream of [`DataBatch`](chainbatch_core::DataBatch)es:
//! polls the archive height, fetches blocks range by range with retries, and
//! publishes them onto a bounded channel consumed by the runner.

pub mod archive;
pub mod pipeline;
pub mod retry;

pub use archive::{ArchiveClient, MemoryArchive};
pub use pipeline::{IngestConfig, Ingester};
pub use retry::RetryPolicy;
