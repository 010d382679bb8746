//! Raw-format retrieval requests.
//!
//! A [`RawRequest`] replays recorded market data exactly as stored, as one
//! globally time-ordered sequence of [`TextLine`]s across every exchange in
//! the filter. Two delivery modes share one fetch plan and one merge
//! machine: [`RawRequest::download`] materializes everything (all or
//! nothing), [`RawRequest::stream`] delivers lazily with bounded fetch-ahead.

use std::sync::Arc;

use tracing::info;

use exd_core::{
    merge::merge_shards,
    time::AnyDateTime,
    types::{Filter, TextLine},
};

use crate::error::{Error, Result};
use crate::http::{check_channels, check_exchange, check_format};
use crate::plan::{fetch_ordered, group_by_exchange, plan_tasks};
use crate::shard::ShardSource;
use crate::stream::{RawLineStream, StreamParams};

/// Defaults a request inherits from the client that built it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestDefaults {
    pub concurrency: usize,
    pub watermark: usize,
}

/// One raw retrieval request over a filter and nanosecond range.
pub struct RawRequest {
    source: Arc<dyn ShardSource>,
    filter: Filter,
    start: i64,
    end: i64,
    format: Option<String>,
    defaults: RequestDefaults,
}

impl RawRequest {
    pub(crate) fn new(
        source: Arc<dyn ShardSource>,
        filter: Filter,
        start: AnyDateTime,
        end: AnyDateTime,
        format: Option<String>,
        defaults: RequestDefaults,
    ) -> Result<Self> {
        for (exchange, channels) in filter.entries() {
            check_exchange(exchange)?;
            check_channels(channels)?;
        }
        check_format(format.as_deref())?;
        let start = start.to_nanos()?;
        let end = end.to_nanos()?;
        if start >= end {
            return Err(Error::Validation(format!(
                "\"start\" must be before \"end\": {start} >= {end}"
            )));
        }
        Ok(Self {
            source,
            filter,
            start,
            end,
            format,
            defaults,
        })
    }

    /// Fetch everything and return the fully merged sequence.
    ///
    /// All or nothing: any task failure discards every partial result and
    /// surfaces as the request's failure.
    pub async fn download(&self) -> Result<Vec<TextLine>> {
        self.download_with_concurrency(self.defaults.concurrency)
            .await
    }

    /// [`RawRequest::download`] with an explicit worker bound.
    pub async fn download_with_concurrency(&self, concurrency: usize) -> Result<Vec<TextLine>> {
        let tasks = plan_tasks(&self.filter, self.start, self.end, self.format.as_deref());
        let shards = fetch_ordered(Arc::clone(&self.source), &tasks, concurrency).await?;
        let grouped = group_by_exchange(&tasks, shards, self.filter.len());
        let merged = merge_shards(grouped);
        info!(
            event_type = "download_complete",
            tasks = tasks.len(),
            lines = merged.len(),
            "materialized raw request"
        );
        Ok(merged)
    }

    /// Lazy streaming delivery with the client's default watermark.
    ///
    /// No fetching happens until the first pull. The produced sequence is
    /// ordered identically to [`RawRequest::download`] for the same request.
    pub fn stream(&self) -> RawLineStream {
        self.stream_with_watermark(self.defaults.watermark)
    }

    /// [`RawRequest::stream`] with an explicit fetch-ahead watermark, in
    /// shard units (one shard is one exchange-minute or one snapshot).
    pub fn stream_with_watermark(&self, watermark: usize) -> RawLineStream {
        RawLineStream::new(StreamParams {
            source: Arc::clone(&self.source),
            tasks: plan_tasks(&self.filter, self.start, self.end, self.format.as_deref()),
            exchange_count: self.filter.len(),
            concurrency: self.defaults.concurrency,
            watermark,
        })
    }
}
