//! Task planning and the bounded worker pool.
//!
//! A request decomposes into a fixed, deterministic task list: for each
//! exchange in filter order, one snapshot task at the range start, then one
//! filter task per minute in `[minuteOf(start), minuteOf(end - 1)]`.
//! Execution is an ordered parallel map: results land at their task's
//! position regardless of completion order, and the first failure aborts the
//! whole request with no partial results.

use std::sync::Arc;

use futures_util::{stream, StreamExt, TryStreamExt};
use tracing::debug;

use exd_core::{nanos_to_minute, types::Filter, types::Shard};

use crate::error::Result;
use crate::shard::{FetchTask, ShardSource, TaskUnit};

/// Decompose a request into its ordered fetch tasks.
pub fn plan_tasks(filter: &Filter, start: i64, end: i64, format: Option<&str>) -> Vec<FetchTask> {
    let first_minute = nanos_to_minute(start);
    let last_minute = nanos_to_minute(end - 1);

    let mut tasks = Vec::new();
    for (exchange_index, (exchange, channels)) in filter.entries().iter().enumerate() {
        let template = FetchTask {
            exchange_index,
            exchange: exchange.clone(),
            channels: channels.clone(),
            unit: TaskUnit::Snapshot { at: start },
            format: format.map(str::to_string),
            start,
            end,
        };
        tasks.push(template.clone());
        for minute in first_minute..=last_minute {
            tasks.push(FetchTask {
                unit: TaskUnit::Filter { minute },
                ..template.clone()
            });
        }
    }
    debug!(
        event_type = "plan_built",
        exchanges = filter.len(),
        tasks = tasks.len(),
        first_minute,
        last_minute,
        "planned fetch tasks"
    );
    tasks
}

/// Shards a streaming fetch keeps per exchange, used to retire merge cursors
/// as soon as their exchange's last shard has been consumed.
pub fn shards_per_exchange(tasks: &[FetchTask], exchange_count: usize) -> Vec<usize> {
    let mut counts = vec![0; exchange_count];
    for task in tasks {
        counts[task.exchange_index] += 1;
    }
    counts
}

/// Execute tasks with at most `concurrency` in flight, yielding results in
/// task order. Dropping the returned future (or its first error) cancels
/// whatever is still in flight and schedules nothing further.
pub async fn fetch_ordered(
    source: Arc<dyn ShardSource>,
    tasks: &[FetchTask],
    concurrency: usize,
) -> Result<Vec<Shard>> {
    let fetches = tasks.iter().cloned().map(|task| {
        let source = Arc::clone(&source);
        async move { source.fetch(&task).await }
    });
    stream::iter(fetches)
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// Regroup positional results by exchange, preserving each exchange's
/// snapshot-then-ascending-minute order.
pub fn group_by_exchange(
    tasks: &[FetchTask],
    shards: Vec<Shard>,
    exchange_count: usize,
) -> Vec<Vec<Shard>> {
    let mut grouped: Vec<Vec<Shard>> = vec![Vec::new(); exchange_count];
    for (task, shard) in tasks.iter().zip(shards) {
        grouped[task.exchange_index].push(shard);
    }
    grouped
}
