//! Processor configuration and runtime state types.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::range::Range;

/// Backoff settings for transient archive errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Cap on the delay between retries.
    pub max_backoff_ms: u64,
    /// Multiplier applied to the delay on each retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Configuration for a processor instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Unique name for this processor (used in logs).
    pub id: String,
    /// Chain being indexed (e.g. `"kusama"`).
    pub chain: String,
    /// Global block range. `None` = from genesis, run forever.
    pub range: Option<Range>,
    /// Maximum number of blocks per archive request.
    pub batch_size: usize,
    /// How long to wait before polling the archive height again (milliseconds).
    pub poll_interval_ms: u64,
    /// Number of fetched batches buffered between ingester and runner.
    pub channel_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            chain: "substrate".into(),
            range: None,
            batch_size: 100,
            poll_interval_ms: 2000,
            channel_capacity: 3,
            retry: RetryConfig::default(),
        }
    }
}

impl ProcessorConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, IndexerError> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| IndexerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if let Some(range) = &self.range {
            range.validate()?;
        }
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be at least 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(IndexerError::Config("channel_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Runtime state of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorState {
    /// Not yet started.
    Idle,
    /// Processing the schedule.
    Running,
    /// Shutting down after an abort.
    Stopping,
    /// Every batch of the schedule was processed.
    Finished,
    /// Terminated by an unrecoverable error.
    Error,
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Finished => write!(f, "finished"),
            Self::Error => write!(f, "error"),
        }
    }
}
