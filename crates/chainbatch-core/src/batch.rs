//! Batch scheduling: turns handler registrations into an ordered, disjoint
//! partition of the block-height line.
//!
//! ```text
//! registrations ──build_batches──▶ one batch per registration
//!               ──merge_batches──▶ sorted, non-overlapping schedule
//! ```
//!
//! The merger sweeps a min-heap keyed on `range.from`. Whenever the smallest
//! batch overlaps the next one, both are cut into their exclusive pieces and
//! the shared piece (with merged handlers) and everything is pushed back, so
//! no partial overlap survives.

use crate::error::IndexerError;
use crate::handler::{HandlerSet, Registration};
use crate::heap::Heap;
use crate::range::Range;
use crate::types::Block;

/// Union of two handler payloads active over the same heights.
pub trait Merge {
    fn merge(&self, other: &Self) -> Self;
}

impl Merge for HandlerSet {
    fn merge(&self, other: &Self) -> Self {
        HandlerSet::merge(self, other)
    }
}

/// A schedule segment: a range and the handlers active throughout it.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<H = HandlerSet> {
    pub range: Range,
    pub handlers: H,
}

impl<H> Batch<H> {
    pub fn new(range: Range, handlers: H) -> Self {
        Self { range, handlers }
    }
}

/// A batch together with the blocks fetched for one pass over part of it.
///
/// `range` is always finite: the heights this pass covers. Blocks are in
/// strictly ascending height order and all lie inside `range`; heights in
/// `range` without a block hold no matching data.
#[derive(Debug, Clone)]
pub struct DataBatch {
    pub range: Range,
    pub blocks: Vec<Block>,
    pub handlers: HandlerSet,
}

impl DataBatch {
    /// Last height covered by this pass.
    pub fn to(&self) -> u64 {
        self.range.to.unwrap_or(self.range.from)
    }
}

/// One single-handler batch per registration, clipped to `bound`.
///
/// Registrations whose range does not intersect `bound` are dropped.
/// Malformed ranges (`from > to`) are rejected.
pub fn build_batches(
    registrations: &[Registration],
    bound: Option<&Range>,
) -> Result<Vec<Batch>, IndexerError> {
    let bound = match bound {
        Some(b) => {
            b.validate()?;
            *b
        }
        None => Range::all(),
    };
    let mut batches = Vec::with_capacity(registrations.len());
    for reg in registrations {
        let range = reg.range.unwrap_or_default();
        range.validate()?;
        let Some(effective) = range.intersection(&bound) else {
            tracing::debug!(%range, %bound, "Registration outside the processor range, skipped");
            continue;
        };
        batches.push(Batch::new(effective, HandlerSet::single(&reg.kind, reg.selection.as_ref())));
    }
    Ok(batches)
}

/// Merge batches into a sorted, disjoint partition.
///
/// For every covered height the output batch holds the merge of every input
/// batch containing that height. Heights covered by no input stay uncovered.
pub fn merge_batches<H: Merge + Clone>(batches: Vec<Batch<H>>) -> Vec<Batch<H>> {
    let by_start = |a: &Batch<H>, b: &Batch<H>| a.range.from < b.range.from;
    let mut heap = Heap::from_vec(batches, by_start);
    let mut out = Vec::new();
    let Some(mut top) = heap.pop() else {
        return out;
    };
    loop {
        while let Some(shared) = heap.peek().and_then(|next| top.range.intersection(&next.range)) {
            let Some(next) = heap.pop() else {
                break;
            };
            for rest in top.range.difference(&shared) {
                heap.push(Batch::new(rest, top.handlers.clone()));
            }
            for rest in next.range.difference(&shared) {
                heap.push(Batch::new(rest, next.handlers.clone()));
            }
            let merged = Batch::new(shared, top.handlers.merge(&next.handlers));
            top = heap.push_pop(merged);
        }
        out.push(top);
        match heap.pop() {
            Some(next) => top = next,
            None => break,
        }
    }
    out
}

/// Build and merge: the processor's schedule for `registrations` within `bound`.
pub fn schedule(
    registrations: &[Registration],
    bound: Option<&Range>,
) -> Result<Vec<Batch>, IndexerError> {
    let batches = build_batches(registrations, bound)?;
    let merged = merge_batches(batches);
    tracing::debug!(batches = merged.len(), "Schedule computed");
    Ok(merged)
}
