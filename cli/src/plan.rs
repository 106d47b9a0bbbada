//! Plan files: a processor config plus handler registrations, in JSON.
//!
//! ```json
//! {
//!   "config": { "range": { "from": 0, "to": 100000 }, "batch_size": 500 },
//!   "watermark": 1200,
//!   "handlers": [
//!     { "kind": "event", "name": "Balances.Transfer", "range": { "from": 0, "to": 10 } },
//!     { "kind": "pre", "range": { "from": 5 } },
//!     { "kind": "evm_log", "contract": "0xAbC", "filter": ["0xddf2…"] },
//!     { "kind": "gear_message", "message": "enqueued", "program_id": "0x01" }
//!   ]
//! }
//! ```

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use chainbatch_core::{
    Batch, BlockHandler, Call, CallHandler, Event, EventHandler, GearMessageKind, HandlerContext,
    IndexerError, ProcessorConfig, Range, Registration, Selection, TopicFilter,
};
use chainbatch_processor::ProcessorBuilder;

#[derive(Debug, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub config: ProcessorConfig,
    /// Height already committed by a previous run.
    #[serde(default)]
    pub watermark: Option<u64>,
    pub handlers: Vec<HandlerSpec>,
}

#[derive(Debug, Deserialize)]
pub struct HandlerSpec {
    #[serde(flatten)]
    pub kind: KindSpec,
    #[serde(default)]
    pub range: Option<Range>,
    #[serde(default)]
    pub selection: Option<Selection>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KindSpec {
    Pre,
    Post,
    Event {
        name: String,
    },
    Call {
        name: String,
        #[serde(default)]
        failed_calls: bool,
    },
    EvmLog {
        contract: String,
        #[serde(default)]
        filter: Option<TopicFilter>,
    },
    ContractEvent {
        contract: String,
    },
    GearMessage {
        message: GearMessageKind,
        program_id: String,
    },
}

/// Stand-in handler: plans never run, they only need registrations.
struct Planned(String);

#[async_trait]
impl BlockHandler for Planned {
    async fn handle(&self, _ctx: &mut HandlerContext<'_>) -> Result<(), IndexerError> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl EventHandler for Planned {
    async fn handle(
        &self,
        _event: &Event,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl CallHandler for Planned {
    async fn handle(
        &self,
        _call: &Call,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.0
    }
}

impl HandlerSpec {
    fn registration(self, index: usize) -> Registration {
        let planned = Arc::new(Planned(format!("handler#{index}")));
        let registration = match self.kind {
            KindSpec::Pre => Registration::pre(planned),
            KindSpec::Post => Registration::post(planned),
            KindSpec::Event { name } => Registration::event(name, planned),
            KindSpec::Call { name, failed_calls } => {
                let call = Registration::call(name, planned);
                if failed_calls {
                    call.with_failed_calls()
                } else {
                    call
                }
            }
            KindSpec::EvmLog { contract, filter } => {
                Registration::evm_log(contract, filter, planned)
            }
            KindSpec::ContractEvent { contract } => Registration::contract_event(contract, planned),
            KindSpec::GearMessage { message, program_id } => {
                Registration::gear_message(message, program_id, planned)
            }
        };
        let registration = match self.range {
            Some(range) => registration.with_range(range),
            None => registration,
        };
        match self.selection {
            Some(selection) => registration.with_selection(selection),
            None => registration,
        }
    }
}

impl PlanFile {
    pub fn parse(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid plan file")
    }

    /// The merged schedule this plan would process.
    pub fn schedule(self) -> anyhow::Result<Vec<Batch>> {
        let builder = self
            .handlers
            .into_iter()
            .enumerate()
            .fold(ProcessorBuilder::with_config(self.config), |b, (i, spec)| {
                b.add(spec.registration(i))
            });
        let processor = builder.build()?;
        Ok(processor.plan(self.watermark)?)
    }
}

/// One line per batch: range, handler count and the archive request.
pub fn render(batches: &[Batch]) -> anyhow::Result<String> {
    let mut out = String::new();
    for batch in batches {
        let request = serde_json::to_string(&batch.handlers.data_request())?;
        out.push_str(&format!(
            "{:<24} handlers={:<3} request={}\n",
            batch.range.to_string(),
            batch.handlers.handler_count(),
            request
        ));
    }
    Ok(out)
}
