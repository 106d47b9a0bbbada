//! Handler traits, registrations and the per-batch [`HandlerSet`].
//!
//! A [`Registration`] is what the user hands to the processor builder: one
//! handler, the kind of activity it listens to, an optional block range and
//! an optional [`Selection`]. The batch builder turns each registration into
//! a single-handler [`HandlerSet`]; the merger unions sets over overlapping
//! ranges with [`HandlerSet::merge`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chain::ChainHandle;
use crate::error::IndexerError;
use crate::range::Range;
use crate::request::{DataRequest, EvmLogRequest};
use crate::selection::Selection;
use crate::store::Transaction;
use crate::types::{BlockHeader, Call, Event, TopicFilter};

/// Name that matches every event or call.
pub const WILDCARD: &str = "*";

/// Context passed to every handler invocation.
pub struct HandlerContext<'a> {
    /// Header of the block being processed.
    pub block: &'a BlockHeader,
    /// Decoding handle for the block's runtime.
    pub chain: &'a dyn ChainHandle,
    /// Transaction scoped to this block.
    pub store: &'a mut dyn Transaction,
}

/// Pre- and post-block hooks. Called once per block in the hook's range.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn handle(&self, ctx: &mut HandlerContext<'_>) -> Result<(), IndexerError>;

    /// Name used in error reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handlers for events, EVM logs, contract emissions and gear messages.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event, ctx: &mut HandlerContext<'_>) -> Result<(), IndexerError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Handlers for calls.
#[async_trait]
pub trait CallHandler: Send + Sync {
    async fn handle(&self, call: &Call, ctx: &mut HandlerContext<'_>) -> Result<(), IndexerError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// ─── Registration ─────────────────────────────────────────────────────────────

/// The two gear message events a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GearMessageKind {
    Enqueued,
    UserMessageSent,
}

/// What a registration listens to.
#[derive(Clone)]
pub enum HandlerKind {
    Pre(Arc<dyn BlockHandler>),
    Post(Arc<dyn BlockHandler>),
    Event {
        name: String,
        handler: Arc<dyn EventHandler>,
    },
    Call {
        name: String,
        handler: Arc<dyn CallHandler>,
        trigger_for_failed_calls: bool,
    },
    EvmLog {
        contract: String,
        filter: Option<TopicFilter>,
        handler: Arc<dyn EventHandler>,
    },
    ContractEvent {
        contract: String,
        handler: Arc<dyn EventHandler>,
    },
    GearMessage {
        kind: GearMessageKind,
        program_id: String,
        handler: Arc<dyn EventHandler>,
    },
}

/// One user handler plus where and what it wants.
#[derive(Clone)]
pub struct Registration {
    pub kind: HandlerKind,
    /// Block range; `None` = every block.
    pub range: Option<Range>,
    /// Requested data; `None` = everything.
    pub selection: Option<Selection>,
}

impl Registration {
    pub fn new(kind: HandlerKind) -> Self {
        Self {
            kind,
            range: None,
            selection: None,
        }
    }

    pub fn pre(handler: Arc<dyn BlockHandler>) -> Self {
        Self::new(HandlerKind::Pre(handler))
    }

    pub fn post(handler: Arc<dyn BlockHandler>) -> Self {
        Self::new(HandlerKind::Post(handler))
    }

    /// Handler for events named `name` (`"*"` for every event).
    pub fn event(name: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self::new(HandlerKind::Event {
            name: name.into(),
            handler,
        })
    }

    /// Handler for successful calls named `name` (`"*"` for every call).
    pub fn call(name: impl Into<String>, handler: Arc<dyn CallHandler>) -> Self {
        Self::new(HandlerKind::Call {
            name: name.into(),
            handler,
            trigger_for_failed_calls: false,
        })
    }

    pub fn evm_log(
        contract: impl Into<String>,
        filter: Option<TopicFilter>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self::new(HandlerKind::EvmLog {
            contract: contract.into().to_ascii_lowercase(),
            filter,
            handler,
        })
    }

    pub fn contract_event(contract: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self::new(HandlerKind::ContractEvent {
            contract: contract.into().to_ascii_lowercase(),
            handler,
        })
    }

    pub fn gear_message(
        kind: GearMessageKind,
        program_id: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self::new(HandlerKind::GearMessage {
            kind,
            program_id: program_id.into().to_ascii_lowercase(),
            handler,
        })
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Also trigger a call handler for failed calls. No-op for other kinds.
    pub fn with_failed_calls(mut self) -> Self {
        if let HandlerKind::Call {
            trigger_for_failed_calls,
            ..
        } = &mut self.kind
        {
            *trigger_for_failed_calls = true;
        }
        self
    }
}

// ─── HandlerSet ───────────────────────────────────────────────────────────────

/// Event handlers registered under one name, with their merged selection.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub selection: Selection,
    pub handlers: Vec<Arc<dyn EventHandler>>,
}

#[derive(Clone)]
pub struct CallHandlerEntry {
    pub handler: Arc<dyn CallHandler>,
    pub trigger_for_failed_calls: bool,
}

/// Call handlers registered under one name, with their merged selection.
#[derive(Clone, Default)]
pub struct CallHandlers {
    pub selection: Selection,
    pub handlers: Vec<CallHandlerEntry>,
}

#[derive(Clone)]
pub struct EvmLogHandler {
    pub filter: Option<TopicFilter>,
    pub selection: Selection,
    pub handler: Arc<dyn EventHandler>,
}

/// Handler keyed by a contract address or program id.
#[derive(Clone)]
pub struct AddressedHandler {
    pub selection: Selection,
    pub handler: Arc<dyn EventHandler>,
}

/// The handlers active over one batch range, grouped by kind.
#[derive(Clone, Default)]
pub struct HandlerSet {
    pub pre: Vec<Arc<dyn BlockHandler>>,
    pub post: Vec<Arc<dyn BlockHandler>>,
    pub events: BTreeMap<String, EventHandlers>,
    pub calls: BTreeMap<String, CallHandlers>,
    /// Lower-cased contract address → handlers.
    pub evm_logs: BTreeMap<String, Vec<EvmLogHandler>>,
    /// Lower-cased contract address → handlers.
    pub contract_events: BTreeMap<String, Vec<AddressedHandler>>,
    /// Lower-cased program id → handlers.
    pub gear_messages_enqueued: BTreeMap<String, Vec<AddressedHandler>>,
    /// Lower-cased program id → handlers.
    pub gear_user_messages_sent: BTreeMap<String, Vec<AddressedHandler>>,
}

impl HandlerSet {
    /// A set holding exactly the registration's handler.
    pub fn single(kind: &HandlerKind, selection: Option<&Selection>) -> Self {
        let selection = selection.cloned().unwrap_or(Selection::All);
        let mut set = Self::default();
        match kind {
            HandlerKind::Pre(h) => set.pre.push(Arc::clone(h)),
            HandlerKind::Post(h) => set.post.push(Arc::clone(h)),
            HandlerKind::Event { name, handler } => {
                set.events.insert(
                    name.clone(),
                    EventHandlers {
                        selection,
                        handlers: vec![Arc::clone(handler)],
                    },
                );
            }
            HandlerKind::Call {
                name,
                handler,
                trigger_for_failed_calls,
            } => {
                set.calls.insert(
                    name.clone(),
                    CallHandlers {
                        selection,
                        handlers: vec![CallHandlerEntry {
                            handler: Arc::clone(handler),
                            trigger_for_failed_calls: *trigger_for_failed_calls,
                        }],
                    },
                );
            }
            HandlerKind::EvmLog {
                contract,
                filter,
                handler,
            } => {
                set.evm_logs.insert(
                    contract.clone(),
                    vec![EvmLogHandler {
                        filter: filter.clone(),
                        selection,
                        handler: Arc::clone(handler),
                    }],
                );
            }
            HandlerKind::ContractEvent { contract, handler } => {
                set.contract_events.insert(
                    contract.clone(),
                    vec![AddressedHandler {
                        selection,
                        handler: Arc::clone(handler),
                    }],
                );
            }
            HandlerKind::GearMessage {
                kind,
                program_id,
                handler,
            } => {
                let map = match kind {
                    GearMessageKind::Enqueued => &mut set.gear_messages_enqueued,
                    GearMessageKind::UserMessageSent => &mut set.gear_user_messages_sent,
                };
                map.insert(
                    program_id.clone(),
                    vec![AddressedHandler {
                        selection,
                        handler: Arc::clone(handler),
                    }],
                );
            }
        }
        set
    }

    /// Deep union: lists concatenate, maps union by key.
    pub fn merge(&self, other: &HandlerSet) -> HandlerSet {
        HandlerSet {
            pre: concat(&self.pre, &other.pre),
            post: concat(&self.post, &other.post),
            events: union_with(&self.events, &other.events, |a, b| EventHandlers {
                selection: a.selection.merge(&b.selection),
                handlers: concat(&a.handlers, &b.handlers),
            }),
            calls: union_with(&self.calls, &other.calls, |a, b| CallHandlers {
                selection: a.selection.merge(&b.selection),
                handlers: concat(&a.handlers, &b.handlers),
            }),
            evm_logs: union_with(&self.evm_logs, &other.evm_logs, |a, b| concat(a, b)),
            contract_events: union_with(&self.contract_events, &other.contract_events, |a, b| {
                concat(a, b)
            }),
            gear_messages_enqueued: union_with(
                &self.gear_messages_enqueued,
                &other.gear_messages_enqueued,
                |a, b| concat(a, b),
            ),
            gear_user_messages_sent: union_with(
                &self.gear_user_messages_sent,
                &other.gear_user_messages_sent,
                |a, b| concat(a, b),
            ),
        }
    }

    /// Returns `true` if any pre/post hook is present (every block must be fetched).
    pub fn has_block_hooks(&self) -> bool {
        !self.pre.is_empty() || !self.post.is_empty()
    }

    /// Total number of handlers across all kinds.
    pub fn handler_count(&self) -> usize {
        self.pre.len()
            + self.post.len()
            + self.events.values().map(|e| e.handlers.len()).sum::<usize>()
            + self.calls.values().map(|c| c.handlers.len()).sum::<usize>()
            + self.evm_logs.values().map(Vec::len).sum::<usize>()
            + self.contract_events.values().map(Vec::len).sum::<usize>()
            + self.gear_messages_enqueued.values().map(Vec::len).sum::<usize>()
            + self.gear_user_messages_sent.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.handler_count() == 0
    }

    /// Every event handler that must see `event`, in dispatch order:
    /// wildcard, exact name, then the address-keyed kinds.
    pub fn event_handlers_for<'s>(&'s self, event: &Event) -> Vec<&'s Arc<dyn EventHandler>> {
        let mut out = Vec::new();
        for key in [WILDCARD, event.name.as_str()] {
            if let Some(entry) = self.events.get(key) {
                out.extend(entry.handlers.iter());
            }
            if event.name == WILDCARD {
                break;
            }
        }
        if let Some(address) = event.evm_log_address() {
            if let Some(entries) = self.evm_logs.get(&address.to_ascii_lowercase()) {
                let topics = event.evm_log_topics();
                out.extend(
                    entries
                        .iter()
                        .filter(|e| e.filter.as_ref().map_or(true, |f| f.matches(&topics)))
                        .map(|e| &e.handler),
                );
            }
        }
        if let Some(contract) = event.contract_address() {
            if let Some(entries) = self.contract_events.get(&contract.to_ascii_lowercase()) {
                out.extend(entries.iter().map(|e| &e.handler));
            }
        }
        if let Some(program) = event.gear_program_id() {
            let map = if event.name == crate::types::GEAR_MESSAGE_ENQUEUED_EVENT {
                &self.gear_messages_enqueued
            } else {
                &self.gear_user_messages_sent
            };
            if let Some(entries) = map.get(&program.to_ascii_lowercase()) {
                out.extend(entries.iter().map(|e| &e.handler));
            }
        }
        out
    }

    /// Every call handler that must see `call`. Failed calls only reach
    /// handlers registered with `trigger_for_failed_calls`.
    pub fn call_handlers_for<'s>(&'s self, call: &Call) -> Vec<&'s Arc<dyn CallHandler>> {
        let mut out = Vec::new();
        for key in [WILDCARD, call.name.as_str()] {
            if let Some(entry) = self.calls.get(key) {
                out.extend(
                    entry
                        .handlers
                        .iter()
                        .filter(|h| call.success || h.trigger_for_failed_calls)
                        .map(|h| &h.handler),
                );
            }
            if call.name == WILDCARD {
                break;
            }
        }
        out
    }

    /// The archive request covering this set's data needs.
    pub fn data_request(&self) -> DataRequest {
        let addressed = |map: &BTreeMap<String, Vec<AddressedHandler>>| {
            map.iter()
                .map(|(k, hs)| {
                    let sel = hs.iter().fold(Selection::None, |acc, h| acc.merge(&h.selection));
                    (k.clone(), sel)
                })
                .collect::<BTreeMap<_, _>>()
        };
        DataRequest {
            include_all_blocks: self.has_block_hooks(),
            events: self.events.iter().map(|(k, v)| (k.clone(), v.selection.clone())).collect(),
            calls: self.calls.iter().map(|(k, v)| (k.clone(), v.selection.clone())).collect(),
            evm_logs: self
                .evm_logs
                .iter()
                .map(|(k, hs)| {
                    let reqs = hs
                        .iter()
                        .map(|h| EvmLogRequest {
                            filter: h.filter.clone(),
                            selection: h.selection.clone(),
                        })
                        .collect();
                    (k.clone(), reqs)
                })
                .collect(),
            contract_events: addressed(&self.contract_events),
            gear_messages_enqueued: addressed(&self.gear_messages_enqueued),
            gear_user_messages_sent: addressed(&self.gear_user_messages_sent),
        }
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("pre", &self.pre.len())
            .field("post", &self.post.len())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("calls", &self.calls.keys().collect::<Vec<_>>())
            .field("evm_logs", &self.evm_logs.keys().collect::<Vec<_>>())
            .field("contract_events", &self.contract_events.keys().collect::<Vec<_>>())
            .field("gear_messages_enqueued", &self.gear_messages_enqueued.keys())
            .field("gear_user_messages_sent", &self.gear_user_messages_sent.keys())
            .finish()
    }
}

fn concat<T: Clone>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

fn union_with<V: Clone>(
    a: &BTreeMap<String, V>,
    b: &BTreeMap<String, V>,
    merge: impl Fn(&V, &V) -> V,
) -> BTreeMap<String, V> {
    let mut out = a.clone();
    for (key, value) in b {
        let merged = match out.get(key) {
            Some(existing) => merge(existing, value),
            None => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TopicMatch, EVM_LOG_EVENT};
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _: &Event, _: &mut HandlerContext<'_>) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    #[async_trait]
    impl CallHandler for Noop {
        async fn handle(&self, _c: &Call, _x: &mut HandlerContext<'_>) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    #[async_trait]
    impl BlockHandler for Noop {
        async fn handle(&self, _c: &mut HandlerContext<'_>) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    fn set(reg: Registration) -> HandlerSet {
        HandlerSet::single(&reg.kind, reg.selection.as_ref())
    }

    fn event(name: &str, args: serde_json::Value) -> Event {
        Event {
            id: "1-0".into(),
            index: 0,
            name: name.into(),
            args,
            extrinsic_index: None,
            call_id: None,
        }
    }

    fn call(name: &str, success: bool) -> Call {
        Call {
            id: "1-1".into(),
            name: name.into(),
            args: json!({}),
            success,
            parent_id: None,
            extrinsic_hash: None,
        }
    }

    #[test]
    fn merge_concatenates_and_unions() {
        let transfer = |field: &str| {
            Registration::event("Balances.Transfer", Arc::new(Noop))
                .with_selection(Selection::fields([field]))
        };
        let a = set(transfer("event.args"));
        let b = set(transfer("event.call"));
        let c = set(Registration::pre(Arc::new(Noop)));

        let merged = a.merge(&b).merge(&c);
        assert_eq!(merged.handler_count(), 3);
        assert_eq!(merged.pre.len(), 1);
        let transfers = &merged.events["Balances.Transfer"];
        assert_eq!(transfers.handlers.len(), 2);
        assert_eq!(transfers.selection, Selection::fields(["event.args", "event.call"]));
    }

    #[test]
    fn missing_selection_requests_everything() {
        let a = set(Registration::event("Balances.Transfer", Arc::new(Noop)));
        assert_eq!(a.events["Balances.Transfer"].selection, Selection::All);
    }

    #[test]
    fn event_dispatch_by_name_and_wildcard() {
        let s = set(Registration::event("Balances.Transfer", Arc::new(Noop)))
            .merge(&set(Registration::event(WILDCARD, Arc::new(Noop))));

        assert_eq!(s.event_handlers_for(&event("Balances.Transfer", json!({}))).len(), 2);
        assert_eq!(s.event_handlers_for(&event("System.Remarked", json!({}))).len(), 1);
    }

    #[test]
    fn evm_log_filtered_by_contract_and_topics() {
        let filter =
            TopicFilter::topic0("0xddf2").then(Some(TopicMatch::AnyOf(vec!["0x01".into()])));
        let s = set(Registration::evm_log("0xAAAA", Some(filter), Arc::new(Noop)))
            .merge(&set(Registration::evm_log("0xaaaa", None, Arc::new(Noop))));

        let hit = event(EVM_LOG_EVENT, json!({"address": "0xaaaa", "topics": ["0xDDF2", "0x01"]}));
        let topic_miss =
            event(EVM_LOG_EVENT, json!({"address": "0xAAAA", "topics": ["0xddf2", "0x02"]}));
        let other_contract =
            event(EVM_LOG_EVENT, json!({"address": "0xbbbb", "topics": ["0xddf2", "0x01"]}));

        assert_eq!(s.event_handlers_for(&hit).len(), 2);
        assert_eq!(s.event_handlers_for(&topic_miss).len(), 1);
        assert!(s.event_handlers_for(&other_contract).is_empty());
    }

    #[test]
    fn failed_calls_need_opt_in() {
        let s = set(Registration::call("Utility.batch", Arc::new(Noop)))
            .merge(&set(Registration::call("Utility.batch", Arc::new(Noop)).with_failed_calls()));

        assert_eq!(s.call_handlers_for(&call("Utility.batch", true)).len(), 2);
        assert_eq!(s.call_handlers_for(&call("Utility.batch", false)).len(), 1);
        assert!(s.call_handlers_for(&call("Balances.transfer", true)).is_empty());
    }

    #[test]
    fn gear_kinds_do_not_mix() {
        let s = set(Registration::gear_message(GearMessageKind::Enqueued, "0xP", Arc::new(Noop)));
        let enq = event(crate::types::GEAR_MESSAGE_ENQUEUED_EVENT, json!({"destination": "0xp"}));
        let sent = event(
            crate::types::GEAR_USER_MESSAGE_SENT_EVENT,
            json!({"message": {"source": "0xp"}}),
        );
        assert_eq!(s.event_handlers_for(&enq).len(), 1);
        assert!(s.event_handlers_for(&sent).is_empty());
    }

    #[test]
    fn data_request_push_down() {
        let events_only = set(Registration::event("Balances.Transfer", Arc::new(Noop)))
            .merge(&set(Registration::contract_event("0xC", Arc::new(Noop))));
        let req = events_only.data_request();
        assert!(!req.include_all_blocks);
        assert!(req.events.contains_key("Balances.Transfer"));
        assert_eq!(req.contract_events.get("0xc"), Some(&Selection::All));

        let with_hook = events_only.merge(&set(Registration::post(Arc::new(Noop))));
        assert!(with_hook.data_request().include_all_blocks);
    }
}
