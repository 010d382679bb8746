//! Per-exchange shard sequencing and the cross-exchange k-way merge.
//!
//! Both pieces are pull-driven state machines with no I/O of their own. The
//! materialized path feeds every shard up front and drains; the streaming
//! path feeds shards as they arrive and suspends whenever the merger reports
//! that it needs input. Running the same machine under both paths is what
//! makes the two delivery modes provably order-identical.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use crate::types::{Shard, TextLine};

/// What a [`ShardSequencer`] pull produced.
#[derive(Debug, PartialEq)]
pub enum SequencerPoll {
    /// The next line of this exchange's sequence.
    Line(TextLine),
    /// No line is resident yet, but more shards may still be fed.
    Pending,
    /// Every shard has been drained and no more will come.
    Exhausted,
}

/// Pull cursor over one exchange's ordered shard list.
///
/// Treats the concatenation of shard contents, in feed order, as one
/// continuous sequence, lazily advancing across shard boundaries. It relies
/// on the source shards being individually ordered and end-to-end
/// non-decreasing in time; no boundary adjustment is performed.
#[derive(Debug, Default)]
pub struct ShardSequencer {
    shards: VecDeque<std::vec::IntoIter<TextLine>>,
    finished: bool,
}

impl ShardSequencer {
    /// Empty sequencer that still expects shards to be fed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequencer over a complete shard list; nothing more can be fed.
    pub fn from_shards(shards: Vec<Shard>) -> Self {
        let mut sequencer = Self::new();
        for shard in shards {
            sequencer.feed(shard);
        }
        sequencer.finish();
        sequencer
    }

    /// Append the next shard of this exchange's sequence.
    pub fn feed(&mut self, shard: Shard) {
        debug_assert!(!self.finished, "fed a shard after finish");
        self.shards.push_back(shard.into_iter());
    }

    /// Mark that no further shards will be fed.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Pull the next line, skipping over drained shards.
    pub fn poll(&mut self) -> SequencerPoll {
        loop {
            match self.shards.front_mut() {
                Some(shard) => match shard.next() {
                    Some(line) => return SequencerPoll::Line(line),
                    None => {
                        self.shards.pop_front();
                    }
                },
                None if self.finished => return SequencerPoll::Exhausted,
                None => return SequencerPoll::Pending,
            }
        }
    }
}

/// What a [`KWayMerger`] pull produced.
#[derive(Debug, PartialEq)]
pub enum MergePoll {
    /// The globally next line across all exchanges.
    Line(TextLine),
    /// The sequencer at this slot has no resident line; feed it a shard (or
    /// finish it) before polling again.
    NeedShard(usize),
    /// All sequencers are retired.
    Done,
}

/// K-way merge over per-exchange sequencers.
///
/// Emits lines in non-decreasing `timestamp` order. Equal timestamps are
/// broken by sequencer slot index, i.e. the order exchanges appear in the
/// caller's filter, which is fixed at merge start and independent of fetch
/// completion order.
#[derive(Debug)]
pub struct KWayMerger {
    sequencers: Vec<ShardSequencer>,
    /// Buffered head line per slot; `heap` holds `(timestamp, slot)` for
    /// every `Some` entry.
    heads: Vec<Option<TextLine>>,
    heap: BinaryHeap<Reverse<(i64, usize)>>,
    retired: Vec<bool>,
    /// Slots whose head still needs refilling, typically just the slot that
    /// emitted last.
    unfilled: Vec<usize>,
}

impl KWayMerger {
    /// Merger over the given sequencer slots.
    pub fn new(sequencers: Vec<ShardSequencer>) -> Self {
        let count = sequencers.len();
        Self {
            sequencers,
            heads: (0..count).map(|_| None).collect(),
            heap: BinaryHeap::with_capacity(count),
            retired: vec![false; count],
            unfilled: (0..count).collect(),
        }
    }

    /// Feed a shard to the sequencer at `slot`.
    pub fn feed(&mut self, slot: usize, shard: Shard) {
        self.sequencers[slot].feed(shard);
    }

    /// Mark the sequencer at `slot` as complete.
    pub fn finish(&mut self, slot: usize) {
        self.sequencers[slot].finish();
    }

    /// Mark every sequencer as complete.
    pub fn finish_all(&mut self) {
        for sequencer in &mut self.sequencers {
            sequencer.finish();
        }
    }

    /// Pull the next merged line.
    ///
    /// The merge can only pick a global minimum once every non-retired slot
    /// has a buffered head, so a single starved slot suspends the whole
    /// merge until it is fed — that is the streaming path's blocking point.
    pub fn poll(&mut self) -> MergePoll {
        while let Some(&slot) = self.unfilled.last() {
            match self.sequencers[slot].poll() {
                SequencerPoll::Line(line) => {
                    self.heap.push(Reverse((line.timestamp, slot)));
                    self.heads[slot] = Some(line);
                    self.unfilled.pop();
                }
                SequencerPoll::Pending => return MergePoll::NeedShard(slot),
                SequencerPoll::Exhausted => {
                    self.retired[slot] = true;
                    self.unfilled.pop();
                }
            }
        }

        match self.heap.pop() {
            Some(Reverse((_, slot))) => {
                let line = self.heads[slot]
                    .take()
                    .expect("heap entry without a buffered head");
                self.unfilled.push(slot);
                MergePoll::Line(line)
            }
            None => MergePoll::Done,
        }
    }
}

/// Merge fully materialized per-exchange shard lists into one globally
/// ordered sequence.
pub fn merge_shards(per_exchange: Vec<Vec<Shard>>) -> Vec<TextLine> {
    let sequencers = per_exchange
        .into_iter()
        .map(ShardSequencer::from_shards)
        .collect();
    let mut merger = KWayMerger::new(sequencers);
    let mut merged = Vec::new();
    loop {
        match merger.poll() {
            MergePoll::Line(line) => merged.push(line),
            MergePoll::Done => return merged,
            MergePoll::NeedShard(_) => {
                unreachable!("materialized sequencers are always finished")
            }
        }
    }
}
