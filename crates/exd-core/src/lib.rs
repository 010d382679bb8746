//! Core data model and state machines for replaying recorded exchange feeds.
//!
//! Everything here is pure and I/O-free:
//!
//! - Line model shared by every retrieval path (`Message`/`Send`/`Start`/
//!   `End`/`Error` lines, snapshots, filters)
//! - Wire-format parsing of the filter and snapshot endpoint bodies
//! - Per-exchange shard sequencing and the cross-exchange k-way merge
//! - The stateful replay decoder that learns channel schemas from the data
//!   stream itself
//! - Time-argument normalization and identifier validation
//!
//! The network client lives in `exd-client` and drives these machines.

pub mod merge;
pub mod parse;
pub mod replay;
pub mod time;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use merge::{merge_shards, KWayMerger, MergePoll, SequencerPoll, ShardSequencer};
pub use parse::ParseError;
pub use replay::{replay_filter_to_raw, DecodeError, ReplayDecoder};
pub use time::{nanos_to_minute, AnyDateTime, AnyMinute, TimeError, NANOS_PER_MINUTE};
pub use types::{Filter, Line, LineType, MappingLine, ReplayMessage, Shard, Snapshot, TextLine};
