//! Shared types for the ingestion pipeline: blocks, item logs and EVM topic filters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name of a Frontier EVM log.
pub const EVM_LOG_EVENT: &str = "EVM.Log";
/// Event name of an ink! contract emission.
pub const CONTRACT_EMITTED_EVENT: &str = "Contracts.ContractEmitted";
/// Event name of a gear message put into the queue.
pub const GEAR_MESSAGE_ENQUEUED_EVENT: &str = "Gear.MessageEnqueued";
/// Event name of a gear message sent to a user.
pub const GEAR_USER_MESSAGE_SENT_EVENT: &str = "Gear.UserMessageSent";

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// Header of a fetched block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height.
    pub height: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Runtime spec id the block was produced under (e.g. `"kusama@9430"`).
    pub spec_id: String,
    /// Unix timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

// ─── Items ────────────────────────────────────────────────────────────────────

/// A runtime event as delivered by the archive. `args` is still raw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Archive id (`<height>-<index>`).
    pub id: String,
    /// Position in the block's event list.
    pub index: u32,
    /// Qualified name, e.g. `"Balances.Transfer"`.
    pub name: String,
    #[serde(default)]
    pub args: Value,
    /// Index of the extrinsic that emitted the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsic_index: Option<u32>,
    /// Id of the call that emitted the event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl Event {
    /// Contract address of an `EVM.Log` event.
    pub fn evm_log_address(&self) -> Option<&str> {
        if self.name != EVM_LOG_EVENT {
            return None;
        }
        self.args
            .get("address")
            .or_else(|| self.args.get("log").and_then(|log| log.get("address")))
            .and_then(Value::as_str)
    }

    /// Topics of an `EVM.Log` event, in position order.
    pub fn evm_log_topics(&self) -> Vec<&str> {
        self.args
            .get("topics")
            .or_else(|| self.args.get("log").and_then(|log| log.get("topics")))
            .and_then(Value::as_array)
            .map(|topics| topics.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Emitting contract of a `Contracts.ContractEmitted` event.
    pub fn contract_address(&self) -> Option<&str> {
        if self.name != CONTRACT_EMITTED_EVENT {
            return None;
        }
        self.args.get("contract").and_then(Value::as_str)
    }

    /// Program id a gear message event belongs to: the destination of an
    /// enqueued message, the source of a message sent to a user.
    pub fn gear_program_id(&self) -> Option<&str> {
        match self.name.as_str() {
            GEAR_MESSAGE_ENQUEUED_EVENT => self.args.get("destination").and_then(Value::as_str),
            GEAR_USER_MESSAGE_SENT_EVENT => self
                .args
                .get("message")
                .and_then(|m| m.get("source"))
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

/// A call (extrinsic or nested call) as delivered by the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Archive id.
    pub id: String,
    /// Qualified name, e.g. `"Balances.transfer"`.
    pub name: String,
    #[serde(default)]
    pub args: Value,
    /// `false` if the call was dispatched but failed.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Id of the enclosing call for nested calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Hash of the extrinsic this call belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsic_hash: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One entry of a block's unified item log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockItem {
    Event(Event),
    Call(Call),
}

impl BlockItem {
    pub fn name(&self) -> &str {
        match self {
            Self::Event(e) => &e.name,
            Self::Call(c) => &c.name,
        }
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A fetched block: header plus the item log in execution order
/// (events interleaved with the calls that triggered them, children first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(default)]
    pub items: Vec<BlockItem>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }
}

// ─── TopicFilter ──────────────────────────────────────────────────────────────

/// Match rule for one topic position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicMatch {
    /// Exactly this topic.
    One(String),
    /// Any of these topics.
    AnyOf(Vec<String>),
}

impl TopicMatch {
    fn matches(&self, topic: &str) -> bool {
        match self {
            Self::One(t) => t.eq_ignore_ascii_case(topic),
            Self::AnyOf(ts) => ts.iter().any(|t| t.eq_ignore_ascii_case(topic)),
        }
    }
}

/// Positional EVM topic filter. `None` at a position is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicFilter(pub Vec<Option<TopicMatch>>);

impl TopicFilter {
    /// Filter on topic0 (the event signature hash) only.
    pub fn topic0(topic: impl Into<String>) -> Self {
        Self(vec![Some(TopicMatch::One(topic.into()))])
    }

    /// Add a rule for the next position.
    pub fn then(mut self, rule: Option<TopicMatch>) -> Self {
        self.0.push(rule);
        self
    }

    /// A log matches iff every defined position matches.
    pub fn matches(&self, topics: &[&str]) -> bool {
        self.0.iter().enumerate().all(|(i, rule)| match rule {
            None => true,
            Some(rule) => topics.get(i).map_or(false, |t| rule.matches(t)),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
