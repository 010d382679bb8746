//! Replay-format retrieval requests.
//!
//! A [`ReplayRequest`] is a raw request with a decoding stage on top: raw
//! channels are fetched in `json` format, piped through the stateful
//! [`ReplayDecoder`], and only lines whose normalized channel matches the
//! caller's original filter come out. Because the store may expose merged
//! channel names narrower than the replay-level filter, the underlying fetch
//! requests the union of raw channels needed to satisfy it — translated
//! before anything is fetched, not after decoding.

use std::sync::Arc;

use exd_core::{
    replay_filter_to_raw,
    time::AnyDateTime,
    types::{Filter, MappingLine},
    ReplayDecoder,
};

use crate::error::Result;
use crate::raw::{RawRequest, RequestDefaults};
use crate::shard::ShardSource;
use crate::stream::RawLineStream;

/// One replay retrieval request over a filter and nanosecond range.
pub struct ReplayRequest {
    raw: RawRequest,
    filter: Filter,
}

impl ReplayRequest {
    pub(crate) fn new(
        source: Arc<dyn ShardSource>,
        filter: Filter,
        start: AnyDateTime,
        end: AnyDateTime,
        defaults: RequestDefaults,
    ) -> Result<Self> {
        let raw = RawRequest::new(
            source,
            replay_filter_to_raw(&filter),
            start,
            end,
            Some("json".to_string()),
            defaults,
        )?;
        Ok(Self { raw, filter })
    }

    /// Fetch and decode everything. All or nothing, like the raw download.
    pub async fn download(&self) -> Result<Vec<MappingLine>> {
        let lines = self.raw.download().await?;
        let mut decoder = ReplayDecoder::new(&self.filter);
        let mut decoded = Vec::new();
        for line in lines {
            if let Some(line) = decoder.process(line)? {
                decoded.push(line);
            }
        }
        Ok(decoded)
    }

    /// Lazy streaming delivery of decoded lines.
    pub fn stream(&self) -> ReplayLineStream {
        ReplayLineStream {
            inner: self.raw.stream(),
            decoder: ReplayDecoder::new(&self.filter),
        }
    }

    /// [`ReplayRequest::stream`] with an explicit fetch-ahead watermark.
    pub fn stream_with_watermark(&self, watermark: usize) -> ReplayLineStream {
        ReplayLineStream {
            inner: self.raw.stream_with_watermark(watermark),
            decoder: ReplayDecoder::new(&self.filter),
        }
    }
}

/// Lazy, pull-driven stream of decoded lines. Same lifecycle as
/// [`RawLineStream`]: lazy start, finite, closed after the first error.
pub struct ReplayLineStream {
    inner: RawLineStream,
    decoder: ReplayDecoder,
}

impl ReplayLineStream {
    /// Pull the next decoded line, skipping schema definitions and lines
    /// filtered out by channel normalization.
    pub async fn next_line(&mut self) -> Option<Result<MappingLine>> {
        loop {
            match self.inner.next_line().await? {
                Ok(line) => match self.decoder.process(line) {
                    Ok(Some(decoded)) => return Some(Ok(decoded)),
                    Ok(None) => continue,
                    Err(error) => {
                        // Decode failures are terminal too; stop fetching
                        // and refuse further pulls.
                        self.inner.close();
                        return Some(Err(error.into()));
                    }
                },
                Err(error) => return Some(Err(error)),
            }
        }
    }
}
