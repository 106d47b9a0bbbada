//! chainbatch-processor — sequential block processing on top of the schedule.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use chainbatch_core::RawDecoder;
//! use chainbatch_ingest::MemoryArchive;
//! use chainbatch_processor::ProcessorBuilder;
//! use chainbatch_storage::MemoryStore;
//!
//! # async fn example() -> Result<(), chainbatch_core::IndexerError> {
//! let processor = ProcessorBuilder::new().id("demo").build()?;
//! processor
//!     .run(MemoryArchive::new(Vec::new()), MemoryStore::new(), RawDecoder)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod processor;
pub mod runner;

pub use builder::ProcessorBuilder;
pub use processor::Processor;
pub use runner::Runner;
