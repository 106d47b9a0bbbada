//! Archive data request derived from a batch's handler set.
//!
//! Only the shape matters here: how it is encoded on the wire is up to the
//! archive client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::selection::Selection;
use crate::types::TopicFilter;

/// One EVM log subscription under a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmLogRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<TopicFilter>,
    pub selection: Selection,
}

/// What to fetch for a batch.
///
/// If `include_all_blocks` is `false` the archive only needs to return blocks
/// holding at least one requested item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub include_all_blocks: bool,
    /// Event name → selection (`"*"` = every event).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub events: BTreeMap<String, Selection>,
    /// Call name → selection (`"*"` = every call).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub calls: BTreeMap<String, Selection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evm_logs: BTreeMap<String, Vec<EvmLogRequest>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contract_events: BTreeMap<String, Selection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gear_messages_enqueued: BTreeMap<String, Selection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gear_user_messages_sent: BTreeMap<String, Selection>,
}
