//! Progress tracking — a sliding window of `(time, cumulative count)` samples
//! from which speed and ETA are derived.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Number of samples kept by a [`SpeedTracker`].
pub const DEFAULT_WINDOW: usize = 5;

/// Speed over the last few samples.
pub struct SpeedTracker {
    window: VecDeque<(Instant, u64)>,
    window_size: usize,
    total: u64,
}

impl SpeedTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(2),
            total: 0,
        }
    }

    /// Record `count` more items done at `now`.
    pub fn mark_at(&mut self, count: u64, now: Instant) {
        self.total += count;
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back((now, self.total));
    }

    pub fn mark(&mut self, count: u64) {
        self.mark_at(count, Instant::now());
    }

    /// Cumulative count.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Items processed and time elapsed across the window.
    fn window_delta(&self) -> Option<(u64, Duration)> {
        let (first_at, first_total) = *self.window.front()?;
        let (last_at, last_total) = *self.window.back()?;
        let elapsed = last_at.checked_duration_since(first_at)?;
        if elapsed.is_zero() {
            return None;
        }
        Some((last_total - first_total, elapsed))
    }

    /// Items per second across the window, 0 with fewer than two samples.
    pub fn speed(&self) -> f64 {
        match self.window_delta() {
            Some((done, elapsed)) => done as f64 / elapsed.as_secs_f64(),
            None => 0.0,
        }
    }

    /// Projected time to process `remaining` more items:
    /// `remaining * window_duration / window_count`.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let (done, elapsed) = self.window_delta()?;
        if done == 0 {
            return None;
        }
        Some(elapsed.mul_f64(remaining as f64 / done as f64))
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Read-only view of the processor's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Blocks fetched per second.
    pub ingest_speed: f64,
    /// Blocks processed per second.
    pub mapping_speed: f64,
    /// `last_processed / chain_height`, 0 before the first height is known.
    pub sync_ratio: f64,
    /// Estimated seconds until caught up with `chain_height`.
    pub eta_secs: Option<u64>,
    /// Watermark as last advanced by the runner.
    pub last_processed: Option<u64>,
    /// Latest archive height observed by the ingester.
    pub chain_height: Option<u64>,
    /// Duration of the most recent archive fetch, in milliseconds.
    pub last_fetch_ms: Option<u64>,
}

#[derive(Default)]
struct ProgressState {
    ingest: SpeedTracker,
    mapping: SpeedTracker,
    last_processed: Option<u64>,
    chain_height: Option<u64>,
    last_fetch: Option<Duration>,
}

/// Progress shared between the ingester (writer of ingest samples and chain
/// height) and the runner (writer of mapping samples and watermark).
#[derive(Default)]
pub struct Progress {
    state: Mutex<ProgressState>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingest(&self, blocks: u64, fetch_duration: Duration) {
        let mut state = self.lock();
        state.ingest.mark(blocks);
        state.last_fetch = Some(fetch_duration);
    }

    pub fn record_mapping(&self, blocks: u64, last_processed: u64) {
        let mut state = self.lock();
        state.mapping.mark(blocks);
        state.last_processed = Some(last_processed);
    }

    pub fn set_chain_height(&self, height: u64) {
        let mut state = self.lock();
        state.chain_height = Some(state.chain_height.map_or(height, |h| h.max(height)));
    }

    pub fn set_last_processed(&self, height: u64) {
        self.lock().last_processed = Some(height);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        let sync_ratio = match (state.last_processed, state.chain_height) {
            (Some(done), Some(head)) if head > 0 => (done as f64 / head as f64).min(1.0),
            _ => 0.0,
        };
        let eta_secs = match (state.last_processed, state.chain_height) {
            (Some(done), Some(head)) => {
                state.mapping.eta(head.saturating_sub(done)).map(|d| d.as_secs())
            }
            _ => None,
        };
        ProgressSnapshot {
            ingest_speed: state.ingest.speed(),
            mapping_speed: state.mapping.speed(),
            sync_ratio,
            eta_secs,
            last_processed: state.last_processed,
            chain_height: state.chain_height,
            last_fetch_ms: state.last_fetch.map(|d| d.as_millis() as u64),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        // A poisoned lock only means a panicking writer; the samples are still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
