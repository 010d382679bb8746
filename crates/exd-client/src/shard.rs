//! Fetch tasks and the shard source boundary.
//!
//! A [`FetchTask`] pins down exactly one shard: one exchange, one set of
//! channels, and one time unit (a snapshot instant or a filter minute
//! window). [`ShardSource`] is the seam the scheduler and streaming paths
//! fetch through, so tests can swap the HTTP implementation for an
//! in-memory one.

use async_trait::async_trait;

use exd_core::types::Shard;

use crate::error::Result;
use crate::http::HttpApi;

/// The time unit a task covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskUnit {
    /// Channel states at an instant, in nanoseconds since the epoch.
    Snapshot {
        /// The instant to snapshot at.
        at: i64,
    },
    /// One filter-endpoint minute window.
    Filter {
        /// Minutes since the epoch.
        minute: i64,
    },
}

/// One unit of fetch work, carrying its position in the plan.
#[derive(Debug, Clone)]
pub struct FetchTask {
    /// Slot of this task's exchange in the filter (merge tie-break order).
    pub exchange_index: usize,
    /// Exchange to fetch from.
    pub exchange: String,
    /// Channels to request.
    pub channels: Vec<String>,
    /// Time unit this task covers.
    pub unit: TaskUnit,
    /// Optional wire format hint forwarded to the endpoint.
    pub format: Option<String>,
    /// Request range start, nanoseconds inclusive.
    pub start: i64,
    /// Request range end, nanoseconds exclusive.
    pub end: i64,
}

/// Where shards come from. Read-only shared state across fetch workers.
#[async_trait]
pub trait ShardSource: Send + Sync {
    /// Fetch exactly one shard. An empty shard is a valid outcome; any error
    /// fails the whole owning request.
    async fn fetch(&self, task: &FetchTask) -> Result<Shard>;
}

/// Production source backed by the HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpShardSource {
    api: HttpApi,
}

impl HttpShardSource {
    pub(crate) fn new(api: HttpApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ShardSource for HttpShardSource {
    async fn fetch(&self, task: &FetchTask) -> Result<Shard> {
        match task.unit {
            TaskUnit::Snapshot { at } => {
                let snapshots = self
                    .api
                    .snapshot(&task.exchange, &task.channels, at, task.format.as_deref())
                    .await?;
                Ok(snapshots
                    .into_iter()
                    .map(|snapshot| snapshot.into_line(&task.exchange))
                    .collect())
            }
            TaskUnit::Filter { minute } => {
                self.api
                    .filter(
                        &task.exchange,
                        &task.channels,
                        minute,
                        task.format.as_deref(),
                        Some(task.start.into()),
                        Some(task.end.into()),
                    )
                    .await
            }
        }
    }
}
