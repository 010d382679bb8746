//! Client for replaying recorded exchange feed data from the
//! exchangedataset HTTP endpoints.
//!
//! Given an exchange-and-channel filter and a nanosecond time range, the
//! client fetches per-exchange, per-minute shards concurrently, merges them
//! into one globally time-ordered sequence, and optionally re-parses raw
//! protocol messages into typed records (replay mode).
//!
//! ```rust,ignore
//! use exd_client::{Client, Filter};
//!
//! # async fn example() -> Result<(), exd_client::Error> {
//! let client = Client::new("YOUR-API-KEY")?;
//! let filter = Filter::new().exchange("bitmex", ["orderBookL2_XBTUSD"]);
//! let request = client.replay(filter, "2020-01-01T00:00:00Z", "2020-01-01T00:10:00Z")?;
//!
//! // Materialize everything at once...
//! let lines = request.download().await?;
//!
//! // ...or stream with bounded fetch-ahead.
//! let mut stream = request.stream();
//! while let Some(line) = stream.next_line().await {
//!     let line = line?;
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod http;
pub mod plan;
pub mod raw;
pub mod replay;
pub mod settings;
pub mod shard;
pub mod stream;

// Re-export commonly used types
pub use client::Client;
pub use error::{Error, Result};
pub use http::{HttpApi, HttpTransport};
pub use raw::RawRequest;
pub use replay::{ReplayLineStream, ReplayRequest};
pub use settings::ClientSettings;
pub use shard::{FetchTask, ShardSource, TaskUnit};
pub use stream::RawLineStream;

// Core model re-exports so callers rarely need exd-core directly
pub use exd_core::{
    AnyDateTime, AnyMinute, Filter, Line, LineType, MappingLine, ReplayMessage, Shard, Snapshot,
    TextLine,
};
