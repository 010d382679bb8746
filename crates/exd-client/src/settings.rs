//! Client configuration.
//!
//! Defaults cover everything except the API key. Settings can also be picked
//! up from the environment with the `EXD_` prefix (`EXD_API_KEY`,
//! `EXD_TIMEOUT_SECS`, ...), which is convenient for keeping credentials out
//! of code.

use serde::{Deserialize, Serialize};

/// Settings shared by every request a [`crate::Client`] issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// API key sent as a bearer token on every request.
    pub api_key: String,

    /// Base URL of the HTTP endpoints.
    pub base_url: String,

    /// Per-request connection timeout in seconds.
    pub timeout_secs: f64,

    /// Concurrent fetch tasks a materializing download keeps in flight.
    pub download_concurrency: usize,

    /// Shards the streaming path keeps fetched ahead of the consumer.
    pub stream_watermark: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.exchangedataset.cc/v1/".to_string(),
            timeout_secs: 10.0,
            download_concurrency: 8,
            stream_watermark: 30,
        }
    }
}

impl ClientSettings {
    /// Default settings with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Load settings from `EXD_`-prefixed environment variables on top of
    /// the defaults.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&ClientSettings::default())?)
            .add_source(config::Environment::with_prefix("EXD").prefix_separator("_"));

        let loaded = builder.build()?;
        loaded.try_deserialize()
    }
}
