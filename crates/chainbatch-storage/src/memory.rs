//! In-memory store backend.
//!
//! Entities are JSON values keyed by `(entity, id)`. Each transaction buffers
//! its writes and applies them, together with the watermark, on commit.
//! Useful for testing and short-lived processors that don't need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use chainbatch_core::error::IndexerError;
use chainbatch_core::store::{Store, Transaction};

type Key = (String, String);

#[derive(Default)]
struct State {
    entities: HashMap<Key, Value>,
    watermark: Option<u64>,
    updated_at: Option<DateTime<Utc>>,
    commits: u64,
}

impl State {
    fn move_watermark(&mut self, height: u64) {
        self.watermark = Some(self.watermark.map_or(height, |w| w.max(height)));
        self.updated_at = Some(Utc::now());
    }
}

/// In-memory transactional store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already has committed everything up to `height`.
    pub fn with_watermark(height: u64) -> Self {
        let store = Self::default();
        store.lock().watermark = Some(height);
        store
    }

    pub fn watermark(&self) -> Option<u64> {
        self.lock().watermark
    }

    /// Time the watermark last moved.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.lock().updated_at
    }

    /// Committed value of one entity.
    pub fn get(&self, entity: &str, id: &str) -> Option<Value> {
        self.lock().entities.get(&(entity.to_string(), id.to_string())).cloned()
    }

    /// Number of committed rows of `entity`.
    pub fn count(&self, entity: &str) -> usize {
        self.lock().entities.keys().filter(|(e, _)| e == entity).count()
    }

    /// Committed rows of `entity`, ordered by id.
    pub fn entities(&self, entity: &str) -> BTreeMap<String, Value> {
        self.lock()
            .entities
            .iter()
            .filter(|((e, _), _)| e == entity)
            .map(|((_, id), v)| (id.clone(), v.clone()))
            .collect()
    }

    /// Number of committed block transactions.
    pub fn commits(&self) -> u64 {
        self.lock().commits
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn connect(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.watermark())
    }

    async fn begin(&self, height: u64) -> Result<Box<dyn Transaction>, IndexerError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            height,
            writes: BTreeMap::new(),
        }))
    }

    async fn advance(&self, height: u64) -> Result<(), IndexerError> {
        self.lock().move_watermark(height);
        Ok(())
    }
}

/// Buffered writes of one block. `None` marks a removal.
pub struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    height: u64,
    writes: BTreeMap<Key, Option<Value>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn height(&self) -> u64 {
        self.height
    }

    async fn get(&mut self, entity: &str, id: &str) -> Result<Option<Value>, IndexerError> {
        let key = (entity.to_string(), id.to_string());
        if let Some(pending) = self.writes.get(&key) {
            return Ok(pending.clone());
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.entities.get(&key).cloned())
    }

    async fn upsert(&mut self, entity: &str, id: &str, value: Value) -> Result<(), IndexerError> {
        self.writes.insert((entity.to_string(), id.to_string()), Some(value));
        Ok(())
    }

    async fn remove(&mut self, entity: &str, id: &str) -> Result<(), IndexerError> {
        self.writes.insert((entity.to_string(), id.to_string()), None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        let MemoryTransaction { state, height, writes } = *self;
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(watermark) = state.watermark {
            if height <= watermark {
                return Err(IndexerError::Invariant(format!(
                    "commit at height {height} does not advance watermark {watermark}"
                )));
            }
        }
        let count = writes.len();
        for (key, value) in writes {
            match value {
                Some(v) => state.entities.insert(key, v),
                None => state.entities.remove(&key),
            };
        }
        state.move_watermark(height);
        state.commits += 1;
        tracing::trace!(height, writes = count, "Committed block");
        Ok(())
    }
}
