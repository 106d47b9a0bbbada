//! End-to-end runs of the processor over an in-memory archive and store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use chainbatch_core::{
    BlockHandler, BlockHeader, BlockItem, Call, CallHandler, Event, EventHandler, GearMessageKind,
    HandlerContext, IndexerError, ProcessorState, Range, RawDecoder, Registration, RetryConfig,
    TopicFilter,
};
use chainbatch_core::types::{Block, EVM_LOG_EVENT, GEAR_MESSAGE_ENQUEUED_EVENT};
use chainbatch_ingest::MemoryArchive;
use chainbatch_processor::ProcessorBuilder;
use chainbatch_storage::MemoryStore;

// ─── Fixtures ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Journal(Mutex<Vec<(String, u64)>>);

impl Journal {
    fn push(&self, tag: &str, height: u64) {
        self.0.lock().unwrap().push((tag.to_string(), height));
    }

    fn heights(&self, tag: &str) -> Vec<u64> {
        self.0.lock().unwrap().iter().filter(|(t, _)| t == tag).map(|(_, h)| *h).collect()
    }

    fn tags(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

/// Records every event it sees under `tag` and persists it.
struct Record {
    tag: &'static str,
    journal: Arc<Journal>,
    fail_at: Option<u64>,
}

impl Record {
    fn new(tag: &'static str, journal: &Arc<Journal>) -> Self {
        Self {
            tag,
            journal: Arc::clone(journal),
            fail_at: None,
        }
    }
}

#[async_trait]
impl EventHandler for Record {
    async fn handle(
        &self,
        event: &Event,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), IndexerError> {
        let height = ctx.block.height;
        if self.fail_at == Some(height) {
            return Err(IndexerError::handler(self.tag, "refusing block"));
        }
        let args = ctx.chain.decode_event(event)?;
        ctx.store.upsert(self.tag, &event.id, json!({ "name": event.name, "args": args })).await?;
        self.journal.push(self.tag, height);
        Ok(())
    }
}

struct Hook(&'static str, Arc<Journal>);

#[async_trait]
impl BlockHandler for Hook {
    async fn handle(&self, ctx: &mut HandlerContext<'_>) -> Result<(), IndexerError> {
        self.1.push(self.0, ctx.block.height);
        Ok(())
    }
}

struct CallRecord(Arc<Journal>);

#[async_trait]
impl CallHandler for CallRecord {
    async fn handle(&self, call: &Call, ctx: &mut HandlerContext<'_>) -> Result<(), IndexerError> {
        let tag = if call.success { "call" } else { "failed-call" };
        self.0.push(tag, ctx.block.height);
        Ok(())
    }
}

fn header(height: u64) -> BlockHeader {
    BlockHeader {
        height,
        hash: format!("0x{height:08x}"),
        parent_hash: format!("0x{:08x}", height.saturating_sub(1)),
        spec_id: if height < 100 { "kusama@9000".into() } else { "kusama@9100".into() },
        timestamp: 1_700_000_000 + height as i64 * 6,
    }
}

fn event(height: u64, index: u32, name: &str, args: serde_json::Value) -> BlockItem {
    BlockItem::Event(Event {
        id: format!("{height:010}-{index:06}"),
        index,
        name: name.into(),
        args,
        extrinsic_index: Some(0),
        call_id: None,
    })
}

fn block(height: u64, items: Vec<BlockItem>) -> Block {
    Block {
        header: header(height),
        items,
    }
}

fn named(height: u64, names: &[&str]) -> Block {
    block(
        height,
        names
            .iter()
            .enumerate()
            .map(|(i, n)| event(height, i as u32, n, json!({})))
            .collect(),
    )
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        multiplier: 2.0,
    }
}

fn builder() -> ProcessorBuilder {
    ProcessorBuilder::new()
        .id("test")
        .poll_interval_ms(5)
        .retry(fast_retry())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn processes_every_block_in_height_order() {
    let journal = Arc::new(Journal::default());
    let blocks = (0..50).map(|h| named(h, &["Balances.Transfer"])).collect();
    let archive = Arc::new(MemoryArchive::new(blocks));
    let store = Arc::new(MemoryStore::new());

    let processor = builder()
        .range(Range::new(0, 49).unwrap())
        .batch_size(7)
        .channel_capacity(1)
        .add_event_handler("Balances.Transfer", Record::new("transfer", &journal))
        .build()
        .unwrap();
    processor.run(archive, store.clone(), RawDecoder).await.unwrap();

    assert_eq!(journal.heights("transfer"), (0..50).collect::<Vec<_>>());
    assert_eq!(store.watermark(), Some(49));
    assert_eq!(store.count("transfer"), 50);
    assert_eq!(store.commits(), 50);
    assert_eq!(processor.state(), ProcessorState::Finished);
    assert_eq!(processor.progress().last_processed, Some(49));
}

#[tokio::test]
async fn overlapping_ranges_split_dispatch() {
    // A on [0, 10], B from 5 on: blocks 0..=4 reach A, 5..=10 both, 11.. only B.
    let journal = Arc::new(Journal::default());
    let archive = Arc::new(MemoryArchive::new((0..=15).map(|h| named(h, &["X"])).collect()));
    let store = Arc::new(MemoryStore::new());

    let processor = builder()
        .range(Range::new(0, 15).unwrap())
        .add(
            Registration::event("X", Arc::new(Record::new("a", &journal)))
                .with_range(Range::new(0, 10).unwrap()),
        )
        .add(
            Registration::event("X", Arc::new(Record::new("b", &journal)))
                .with_range(Range::from(5)),
        )
        .build()
        .unwrap();
    assert_eq!(
        processor.plan(None).unwrap().iter().map(|b| b.range).collect::<Vec<_>>(),
        vec![Range::new(0, 4).unwrap(), Range::new(5, 10).unwrap(), Range::new(11, 15).unwrap()]
    );
    processor.run(archive, store, RawDecoder).await.unwrap();

    assert_eq!(journal.heights("a"), (0..=10).collect::<Vec<_>>());
    assert_eq!(journal.heights("b"), (5..=15).collect::<Vec<_>>());
}

#[tokio::test]
async fn empty_ranges_advance_the_watermark() {
    let journal = Arc::new(Journal::default());
    // Matching data only at 3; [20, 30] holds nothing for B.
    let archive = Arc::new(MemoryArchive::new(vec![
        named(3, &["A"]),
        named(12, &["A"]),
        named(25, &["Other"]),
        named(40, &[]),
    ]));
    let store = Arc::new(MemoryStore::new());

    let processor = builder()
        .add(
            Registration::event("A", Arc::new(Record::new("a", &journal)))
                .with_range(Range::new(0, 10).unwrap()),
        )
        .add(
            Registration::event("B", Arc::new(Record::new("b", &journal)))
                .with_range(Range::new(20, 30).unwrap()),
        )
        .build()
        .unwrap();
    processor.run(archive.clone(), store.clone(), RawDecoder).await.unwrap();

    assert_eq!(journal.heights("a"), vec![3]);
    assert!(journal.heights("b").is_empty());
    assert_eq!(store.commits(), 1);
    assert_eq!(store.watermark(), Some(30));
}

#[tokio::test]
async fn restart_resumes_after_watermark() {
    let journal = Arc::new(Journal::default());
    let archive = Arc::new(MemoryArchive::new((0..=40).map(|h| named(h, &["A"])).collect()));
    let store = Arc::new(MemoryStore::with_watermark(20));

    let processor = builder()
        .range(Range::new(0, 40).unwrap())
        .add_event_handler("A", Record::new("a", &journal))
        .build()
        .unwrap();
    processor.run(archive.clone(), store.clone(), RawDecoder).await.unwrap();
    assert_eq!(journal.heights("a"), (21..=40).collect::<Vec<_>>());

    // A second run has nothing left to do.
    let fetches = archive.fetch_calls();
    let again = builder()
        .range(Range::new(0, 40).unwrap())
        .add_event_handler("A", Record::new("a", &journal))
        .build()
        .unwrap();
    again.run(archive.clone(), store.clone(), RawDecoder).await.unwrap();
    assert_eq!(archive.fetch_calls(), fetches);
    assert_eq!(journal.heights("a").len(), 20);
}

#[tokio::test]
async fn handler_error_stops_the_run_without_committing() {
    let journal = Arc::new(Journal::default());
    let archive = Arc::new(MemoryArchive::new((0..20).map(|h| named(h, &["A"])).collect()));
    let store = Arc::new(MemoryStore::new());

    let failing = Record {
        fail_at: Some(5),
        ..Record::new("a", &journal)
    };
    let processor = builder()
        .range(Range::new(0, 19).unwrap())
        .batch_size(3)
        .add_event_handler("A", failing)
        .build()
        .unwrap();
    let err = processor.run(archive, store.clone(), RawDecoder).await.unwrap_err();

    match err {
        IndexerError::Block { height, hash, source } => {
            assert_eq!(height, 5);
            assert_eq!(hash, header(5).hash);
            assert!(matches!(*source, IndexerError::Handler { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.watermark(), Some(4));
    assert!(store.get("a", &format!("{:010}-{:06}", 5, 0)).is_none());
    assert_eq!(processor.state(), ProcessorState::Error);
}

#[tokio::test]
async fn handlers_only_see_what_they_registered_for() {
    let journal = Arc::new(Journal::default());
    let topic = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
    let archive = Arc::new(MemoryArchive::new(vec![
        named(1, &["Balances.Transfer", "System.Remarked"]),
        block(
            2,
            vec![
                event(2, 0, EVM_LOG_EVENT, json!({ "address": "0xAAAA", "topics": [topic] })),
                event(2, 1, EVM_LOG_EVENT, json!({ "address": "0xbbbb", "topics": [topic] })),
                event(2, 2, EVM_LOG_EVENT, json!({ "address": "0xaaaa", "topics": ["0x01"] })),
            ],
        ),
        block(
            3,
            vec![
                event(3, 0, GEAR_MESSAGE_ENQUEUED_EVENT, json!({ "destination": "0xProg" })),
                event(3, 1, GEAR_MESSAGE_ENQUEUED_EVENT, json!({ "destination": "0xother" })),
            ],
        ),
        named(30, &["Balances.Transfer"]),
    ]));
    let store = Arc::new(MemoryStore::new());

    let processor = builder()
        .range(Range::new(0, 30).unwrap())
        .add(
            Registration::event("Balances.Transfer", Arc::new(Record::new("transfer", &journal)))
                .with_range(Range::new(0, 10).unwrap()),
        )
        .add_evm_log_handler(
            "0xaaaa",
            Some(TopicFilter::topic0(topic)),
            Record::new("evm", &journal),
        )
        .add_gear_handler(GearMessageKind::Enqueued, "0xprog", Record::new("gear", &journal))
        .build()
        .unwrap();
    processor.run(archive, store.clone(), RawDecoder).await.unwrap();

    assert_eq!(journal.heights("transfer"), vec![1]);
    assert_eq!(journal.heights("evm"), vec![2]);
    assert_eq!(journal.heights("gear"), vec![3]);
    assert_eq!(store.watermark(), Some(30));
}

#[tokio::test]
async fn block_hooks_run_for_every_block_in_range() {
    let journal = Arc::new(Journal::default());
    let archive = Arc::new(MemoryArchive::new(
        (0..10)
            .map(|h| if h == 6 { named(h, &["A"]) } else { named(h, &[]) })
            .collect(),
    ));
    let store = Arc::new(MemoryStore::new());

    let processor = builder()
        .range(Range::new(0, 9).unwrap())
        .add(
            Registration::pre(Arc::new(Hook("pre", journal.clone())))
                .with_range(Range::new(5, 7).unwrap()),
        )
        .add(
            Registration::post(Arc::new(Hook("post", journal.clone())))
                .with_range(Range::new(5, 7).unwrap()),
        )
        .add_event_handler("A", Record::new("a", &journal))
        .build()
        .unwrap();
    processor.run(archive, store.clone(), RawDecoder).await.unwrap();

    assert_eq!(
        journal.tags(),
        vec!["pre", "post", "pre", "a", "post", "pre", "post"]
    );
    assert_eq!(journal.heights("pre"), vec![5, 6, 7]);
    assert_eq!(store.watermark(), Some(9));
}

#[tokio::test]
async fn failed_calls_reach_opted_in_handlers_only() {
    let journal = Arc::new(Journal::default());
    let call = |height: u64, success: bool| {
        BlockItem::Call(Call {
            id: format!("{height}-call"),
            name: "Balances.transfer".into(),
            args: json!({}),
            success,
            parent_id: None,
            extrinsic_hash: None,
        })
    };
    let archive = Arc::new(MemoryArchive::new(vec![
        block(1, vec![call(1, true)]),
        block(2, vec![call(2, false)]),
    ]));

    let processor = builder()
        .range(Range::new(0, 2).unwrap())
        .add_call_handler("Balances.transfer", CallRecord(journal.clone()))
        .build()
        .unwrap();
    processor.run(archive.clone(), Arc::new(MemoryStore::new()), RawDecoder).await.unwrap();
    assert_eq!(journal.tags(), vec!["call"]);

    let journal = Arc::new(Journal::default());
    let processor = builder()
        .range(Range::new(0, 2).unwrap())
        .add(
            Registration::call("Balances.transfer", Arc::new(CallRecord(journal.clone())))
                .with_failed_calls(),
        )
        .build()
        .unwrap();
    processor.run(archive, Arc::new(MemoryStore::new()), RawDecoder).await.unwrap();
    assert_eq!(journal.tags(), vec!["call", "failed-call"]);
}

#[tokio::test]
async fn waits_for_chain_growth_and_stops_on_abort() {
    let journal = Arc::new(Journal::default());
    let archive = Arc::new(MemoryArchive::new((0..=10).map(|h| named(h, &["A"])).collect()));
    let store = Arc::new(MemoryStore::new());

    let processor = builder()
        .add_event_handler("A", Record::new("a", &journal))
        .build()
        .unwrap();
    let abort = processor.abort_handle();

    let driver = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        archive.extend((11..=15).map(|h| named(h, &["A"])));
        archive.set_height(15);
        tokio::time::sleep(Duration::from_millis(50)).await;
        abort.abort("shutdown requested");
    };
    let run = processor.run(archive.clone(), store.clone(), RawDecoder);
    let (result, ()) = tokio::join!(run, driver);

    result.unwrap();
    assert_eq!(journal.heights("a"), (0..=15).collect::<Vec<_>>());
    assert_eq!(store.watermark(), Some(15));
    assert_eq!(processor.state(), ProcessorState::Stopping);
    assert_eq!(processor.progress().chain_height, Some(15));
}

#[tokio::test]
async fn archive_outage_beyond_retries_is_fatal() {
    let archive = Arc::new(MemoryArchive::new(vec![named(0, &["A"])]));
    archive.fail_next(10);
    let journal = Arc::new(Journal::default());

    let processor = builder()
        .range(Range::new(0, 0).unwrap())
        .add_event_handler("A", Record::new("a", &journal))
        .build()
        .unwrap();
    let err = processor
        .run(archive, Arc::new(MemoryStore::new()), RawDecoder)
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(processor.state(), ProcessorState::Error);
}
