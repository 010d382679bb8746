//! Client entry point.

use std::sync::Arc;

use exd_core::{time::AnyDateTime, types::Filter};

use crate::error::Result;
use crate::http::{HttpApi, HttpTransport};
use crate::raw::{RawRequest, RequestDefaults};
use crate::replay::ReplayRequest;
use crate::settings::ClientSettings;
use crate::shard::{HttpShardSource, ShardSource};

/// Authenticated access to the exchangedataset endpoints.
///
/// Cheap to clone; all shared state is read-only. The API key is validated
/// here, synchronously, so requests built from a `Client` never fail on key
/// syntax.
#[derive(Clone)]
pub struct Client {
    settings: ClientSettings,
    api: HttpApi,
    source: Arc<dyn ShardSource>,
}

impl Client {
    /// Client with default settings and the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_settings(ClientSettings::new(api_key))
    }

    /// Client over explicit settings.
    pub fn with_settings(settings: ClientSettings) -> Result<Self> {
        let transport = HttpTransport::new(&settings)?;
        let api = HttpApi::new(transport);
        let source: Arc<dyn ShardSource> = Arc::new(HttpShardSource::new(api.clone()));
        Ok(Self {
            settings,
            api,
            source,
        })
    }

    /// Swap the backend that requests built from this client fetch through.
    ///
    /// The low-level [`Client::http`] surface keeps talking to the
    /// configured endpoints regardless.
    pub fn with_shard_source(mut self, source: Arc<dyn ShardSource>) -> Self {
        self.source = source;
        self
    }

    /// Low-level endpoint calls: one HTTP request per call, no merging.
    pub fn http(&self) -> &HttpApi {
        &self.api
    }

    /// Build a raw retrieval request.
    ///
    /// `start` is inclusive and `end` exclusive, both accepted as integer
    /// nanoseconds, ISO-8601-like strings, or `chrono` datetimes. Parameters
    /// are validated here; no network activity happens until a delivery mode
    /// is invoked on the returned request.
    pub fn raw(
        &self,
        filter: Filter,
        start: impl Into<AnyDateTime>,
        end: impl Into<AnyDateTime>,
        format: Option<&str>,
    ) -> Result<RawRequest> {
        RawRequest::new(
            Arc::clone(&self.source),
            filter,
            start.into(),
            end.into(),
            format.map(str::to_string),
            self.defaults(),
        )
    }

    /// Build a replay retrieval request over the given replay-level filter.
    pub fn replay(
        &self,
        filter: Filter,
        start: impl Into<AnyDateTime>,
        end: impl Into<AnyDateTime>,
    ) -> Result<ReplayRequest> {
        ReplayRequest::new(
            Arc::clone(&self.source),
            filter,
            start.into(),
            end.into(),
            self.defaults(),
        )
    }

    fn defaults(&self) -> RequestDefaults {
        RequestDefaults {
            concurrency: self.settings.download_concurrency,
            watermark: self.settings.stream_watermark,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn invalid_api_key_is_rejected_at_construction() {
        assert!(matches!(Client::new("not a key"), Err(Error::Validation(_))));
        assert!(matches!(Client::new(""), Err(Error::Validation(_))));
        assert!(Client::new("demo-key_123").is_ok());
    }

    #[test]
    fn inverted_time_range_is_rejected_at_request_construction() {
        let client = Client::new("demo").unwrap();
        let filter = Filter::new().exchange("bitmex", ["trade"]);
        assert!(matches!(
            client.raw(filter.clone(), 10i64, 10i64, None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            client.replay(filter, 20i64, 10i64),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn bad_filter_identifiers_are_rejected() {
        let client = Client::new("demo").unwrap();
        let filter = Filter::new().exchange("bit mex", ["trade"]);
        assert!(matches!(
            client.raw(filter, 0i64, 100i64, None),
            Err(Error::Validation(_))
        ));
    }
}
