//! Buffered streaming delivery of merged lines.
//!
//! The stream overlaps fetching with consumption: a producer task fetches
//! shards ahead of the consumer, bounded by a shard-count watermark, while
//! the consumer drives the same k-way merge state machine the materialized
//! path uses. Construction performs no work; the producer is spawned on the
//! first pull. Dropping the stream cancels the producer so nothing further
//! is scheduled.
//!
//! Fetch scheduling is time-major (all snapshot tasks in filter order, then
//! each minute across exchanges) so the shard the merge will starve on next
//! is always the next one scheduled. Each fetched shard holds a watermark
//! permit from before its request until the consumer hands it to the merge,
//! which is what bounds memory to roughly the watermark plus one working
//! shard per exchange.

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use exd_core::{
    merge::{KWayMerger, MergePoll, ShardSequencer},
    types::{Shard, TextLine},
};

use crate::error::{Error, Result};
use crate::plan::shards_per_exchange;
use crate::shard::{FetchTask, ShardSource, TaskUnit};

/// Everything needed to start fetching, captured at request time.
pub(crate) struct StreamParams {
    pub source: Arc<dyn ShardSource>,
    pub tasks: Vec<FetchTask>,
    pub exchange_count: usize,
    pub concurrency: usize,
    pub watermark: usize,
}

type FetchOutcome = Result<(usize, Shard, OwnedSemaphorePermit)>;

struct Running {
    merger: KWayMerger,
    outcomes: mpsc::UnboundedReceiver<FetchOutcome>,
    /// Shards still expected per exchange slot; a slot's cursor is finished
    /// once its count reaches zero.
    remaining: Vec<usize>,
    cancel: CancellationToken,
}

enum State {
    Idle(Box<StreamParams>),
    Running(Box<Running>),
    Closed,
}

/// Lazy, pull-driven stream of merged lines.
///
/// Finite and not restartable: a fresh traversal requires re-issuing the
/// request. After an error is returned the stream is closed and every later
/// pull returns `None`.
pub struct RawLineStream {
    state: State,
}

impl RawLineStream {
    pub(crate) fn new(params: StreamParams) -> Self {
        Self {
            state: State::Idle(Box::new(params)),
        }
    }

    /// Pull the next merged line.
    ///
    /// Returns immediately while enough shards are resident and suspends
    /// only when the next needed shard has not arrived yet.
    pub async fn next_line(&mut self) -> Option<Result<TextLine>> {
        loop {
            match &mut self.state {
                State::Idle(_) => {
                    let State::Idle(params) = std::mem::replace(&mut self.state, State::Closed)
                    else {
                        unreachable!()
                    };
                    self.state = State::Running(Box::new(start(*params)));
                }
                State::Running(run) => match run.merger.poll() {
                    MergePoll::Line(line) => return Some(Ok(line)),
                    MergePoll::Done => {
                        run.cancel.cancel();
                        self.state = State::Closed;
                        return None;
                    }
                    MergePoll::NeedShard(_) => match run.outcomes.recv().await {
                        Some(Ok((slot, shard, permit))) => {
                            run.merger.feed(slot, shard);
                            // Shard is resident in the merge now; free its
                            // slot in the fetch-ahead budget.
                            drop(permit);
                            run.remaining[slot] -= 1;
                            if run.remaining[slot] == 0 {
                                run.merger.finish(slot);
                            }
                        }
                        Some(Err(error)) => {
                            run.cancel.cancel();
                            self.state = State::Closed;
                            return Some(Err(error));
                        }
                        None => run.merger.finish_all(),
                    },
                },
                State::Closed => return None,
            }
        }
    }
}

impl RawLineStream {
    /// Cancel any in-flight fetching and close the stream; every later pull
    /// returns `None`.
    pub(crate) fn close(&mut self) {
        if let State::Running(run) = &self.state {
            run.cancel.cancel();
        }
        self.state = State::Closed;
    }
}

impl Drop for RawLineStream {
    fn drop(&mut self) {
        if let State::Running(run) = &self.state {
            run.cancel.cancel();
        }
    }
}

/// Spawn the producer and prime the merge cursors.
fn start(params: StreamParams) -> Running {
    let remaining = shards_per_exchange(&params.tasks, params.exchange_count);
    let sequencers = (0..params.exchange_count)
        .map(|_| ShardSequencer::new())
        .collect();
    let mut merger = KWayMerger::new(sequencers);
    for (slot, count) in remaining.iter().enumerate() {
        if *count == 0 {
            merger.finish(slot);
        }
    }

    let (tx, outcomes) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    tokio::spawn(produce(params, tx, cancel.clone()));

    Running {
        merger,
        outcomes,
        remaining,
        cancel,
    }
}

/// Sort key for time-major fetch scheduling; snapshots sort before every
/// minute window.
fn time_major_key(task: &FetchTask) -> (i64, usize) {
    let unit = match task.unit {
        TaskUnit::Snapshot { .. } => i64::MIN,
        TaskUnit::Filter { minute } => minute,
    };
    (unit, task.exchange_index)
}

async fn produce(
    params: StreamParams,
    tx: mpsc::UnboundedSender<FetchOutcome>,
    cancel: CancellationToken,
) {
    let StreamParams {
        source,
        mut tasks,
        concurrency,
        watermark,
        ..
    } = params;
    tasks.sort_by_key(time_major_key);

    let budget = Arc::new(Semaphore::new(watermark.max(1)));
    let fetches = tasks.into_iter().map(|task| {
        let source = Arc::clone(&source);
        let budget = Arc::clone(&budget);
        async move {
            // The semaphore is FIFO and `buffered` first polls futures in
            // task order, so permits are granted in schedule order.
            let permit = budget
                .acquire_owned()
                .await
                .map_err(|_| Error::WorkerGone)?;
            let shard = source.fetch(&task).await?;
            Ok((task.exchange_index, shard, permit))
        }
    });
    let mut results = stream::iter(fetches).buffered(concurrency.max(1));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(event_type = "stream_cancelled", "traversal abandoned, fetching stopped");
                break;
            }
            next = results.next() => match next {
                Some(Ok(outcome)) => {
                    if tx.send(Ok(outcome)).is_err() {
                        break;
                    }
                }
                Some(Err(error)) => {
                    // First failure is terminal for the whole request.
                    let _ = tx.send(Err(error));
                    break;
                }
                None => {
                    debug!(event_type = "stream_complete", "all shards delivered");
                    break;
                }
            }
        }
    }
}
