//! Archive client contract and an in-memory archive.
//!
//! The wire format of archive queries is up to the implementation; the
//! ingester only needs the current height and a range fetch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use chainbatch_core::error::IndexerError;
use chainbatch_core::handler::WILDCARD;
use chainbatch_core::range::Range;
use chainbatch_core::request::DataRequest;
use chainbatch_core::selection::Selection;
use chainbatch_core::types::{
    Block, BlockItem, CONTRACT_EMITTED_EVENT, GEAR_MESSAGE_ENQUEUED_EVENT,
    GEAR_USER_MESSAGE_SENT_EVENT,
};

/// Remote archive serving historical blocks by range.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Highest height the archive can serve.
    async fn height(&self) -> Result<u64, IndexerError>;

    /// Blocks in `range` (always finite), ascending, at most `limit` of them.
    ///
    /// Unless `request.include_all_blocks` is set, only blocks holding at
    /// least one requested item need to be returned.
    async fn fetch(
        &self,
        range: Range,
        limit: usize,
        request: &DataRequest,
    ) -> Result<Vec<Block>, IndexerError>;
}

#[async_trait]
impl<A: ArchiveClient + ?Sized> ArchiveClient for Arc<A> {
    async fn height(&self) -> Result<u64, IndexerError> {
        (**self).height().await
    }

    async fn fetch(
        &self,
        range: Range,
        limit: usize,
        request: &DataRequest,
    ) -> Result<Vec<Block>, IndexerError> {
        (**self).fetch(range, limit, request).await
    }
}

// ─── In-memory archive (for testing) ──────────────────────────────────────────

/// In-memory archive for tests and local replays.
///
/// The reported height can be moved independently of the stored blocks to
/// simulate a growing chain, and transient failures can be injected.
#[derive(Default)]
pub struct MemoryArchive {
    blocks: Mutex<Vec<Block>>,
    height: AtomicU64,
    fail_next: AtomicU32,
    height_calls: AtomicU32,
    fetch_calls: AtomicU32,
}

impl MemoryArchive {
    /// Archive serving `blocks`, reporting the highest block as its height.
    pub fn new(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(Block::height);
        let height = blocks.last().map_or(0, Block::height);
        Self {
            blocks: Mutex::new(blocks),
            height: AtomicU64::new(height),
            ..Default::default()
        }
    }

    /// Change the reported archive height.
    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Add blocks (e.g. as the simulated chain grows).
    pub fn extend(&self, blocks: impl IntoIterator<Item = Block>) {
        let mut stored = self.lock();
        stored.extend(blocks);
        stored.sort_by_key(Block::height);
    }

    /// Make the next `n` calls fail with a transient RPC error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn height_calls(&self) -> u32 {
        self.height_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> Result<(), IndexerError> {
        let pending = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match pending {
            Ok(_) => Err(IndexerError::Rpc("injected archive failure".into())),
            Err(_) => Ok(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Block>> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ArchiveClient for MemoryArchive {
    async fn height(&self) -> Result<u64, IndexerError> {
        self.height_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure()?;
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn fetch(
        &self,
        range: Range,
        limit: usize,
        request: &DataRequest,
    ) -> Result<Vec<Block>, IndexerError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure()?;
        let served = self.height.load(Ordering::SeqCst);
        Ok(self
            .lock()
            .iter()
            .filter(|b| range.contains(b.height()) && b.height() <= served)
            .filter(|b| {
                request.include_all_blocks || b.items.iter().any(|item| wants(request, item))
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Returns `true` if `item` is covered by `request`.
pub fn wants(request: &DataRequest, item: &BlockItem) -> bool {
    let event = match item {
        BlockItem::Call(call) => {
            return request.calls.contains_key(WILDCARD) || request.calls.contains_key(&call.name);
        }
        BlockItem::Event(event) => event,
    };
    if request.events.contains_key(WILDCARD) || request.events.contains_key(&event.name) {
        return true;
    }
    let keyed = |addr: Option<&str>, map: &BTreeMap<String, Selection>| {
        addr.map_or(false, |a| map.contains_key(&a.to_ascii_lowercase()))
    };
    if let Some(addr) = event.evm_log_address() {
        let topics = event.evm_log_topics();
        return request
            .evm_logs
            .get(&addr.to_ascii_lowercase())
            .map_or(false, |subs| {
                subs.iter()
                    .any(|s| s.filter.as_ref().map_or(true, |f| f.matches(&topics)))
            });
    }
    match event.name.as_str() {
        CONTRACT_EMITTED_EVENT => keyed(event.contract_address(), &request.contract_events),
        GEAR_MESSAGE_ENQUEUED_EVENT => {
            keyed(event.gear_program_id(), &request.gear_messages_enqueued)
        }
        GEAR_USER_MESSAGE_SENT_EVENT => {
            keyed(event.gear_program_id(), &request.gear_user_messages_sent)
        }
        _ => false,
    }
}
