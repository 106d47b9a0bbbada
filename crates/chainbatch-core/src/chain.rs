//! Chain decoding collaborator: typed access to raw event and call payloads.
//!
//! Decoding itself (runtime metadata, SCALE codecs) lives outside this crate.
//! The runner only needs a handle per block, memoised by runtime spec id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::IndexerError;
use crate::types::{BlockHeader, Call, Event};

/// Decoding handle for one runtime version.
pub trait ChainHandle: Send + Sync {
    /// Runtime spec id this handle decodes.
    fn spec_id(&self) -> &str;

    /// Decode the args of a raw event.
    fn decode_event(&self, event: &Event) -> Result<Value, IndexerError>;

    /// Decode the args of a raw call.
    fn decode_call(&self, call: &Call) -> Result<Value, IndexerError>;
}

/// Resolves a [`ChainHandle`] for a block.
#[async_trait]
pub trait ChainDecoder: Send + Sync {
    async fn for_block(&self, header: &BlockHeader) -> Result<Arc<dyn ChainHandle>, IndexerError>;
}

/// Memoises [`ChainDecoder::for_block`] by `spec_id`.
pub struct ChainCache<D> {
    decoder: D,
    handles: HashMap<String, Arc<dyn ChainHandle>>,
}

impl<D: ChainDecoder> ChainCache<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            handles: HashMap::new(),
        }
    }

    /// Handle for the block's runtime, resolving it on first use.
    pub async fn for_block(
        &mut self,
        header: &BlockHeader,
    ) -> Result<Arc<dyn ChainHandle>, IndexerError> {
        if let Some(handle) = self.handles.get(&header.spec_id) {
            return Ok(Arc::clone(handle));
        }
        let handle = self.decoder.for_block(header).await?;
        tracing::debug!(spec_id = %header.spec_id, height = header.height, "Resolved chain handle");
        self.handles.insert(header.spec_id.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Number of distinct runtimes resolved so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

// ─── Pass-through decoder ─────────────────────────────────────────────────────

/// Handle that returns payloads as delivered by the archive.
///
/// Useful when the archive already serves JSON-decoded args, and in tests.
pub struct RawChain {
    spec_id: String,
}

impl RawChain {
    pub fn new(spec_id: impl Into<String>) -> Self {
        Self { spec_id: spec_id.into() }
    }
}

impl ChainHandle for RawChain {
    fn spec_id(&self) -> &str {
        &self.spec_id
    }

    fn decode_event(&self, event: &Event) -> Result<Value, IndexerError> {
        Ok(event.args.clone())
    }

    fn decode_call(&self, call: &Call) -> Result<Value, IndexerError> {
        Ok(call.args.clone())
    }
}

/// Decoder producing a [`RawChain`] per spec id.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawDecoder;

#[async_trait]
impl ChainDecoder for RawDecoder {
    async fn for_block(&self, header: &BlockHeader) -> Result<Arc<dyn ChainHandle>, IndexerError> {
        Ok(Arc::new(RawChain::new(header.spec_id.clone())))
    }
}
