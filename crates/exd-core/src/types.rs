//! Line model shared by every retrieval path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a recorded line.
///
/// Lines with different kinds carry different information and have to be
/// treated accordingly; see [`Line`] for which fields each kind populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    /// A message the exchange's server sent. The most usual kind.
    Message,
    /// A request our recording client sent to the exchange. Usually ignorable.
    Send,
    /// First line of a continuous recording; marks a fresh connection to the
    /// exchange's API. Consumers should reset any per-connection state here.
    Start,
    /// Last line of a continuous recording; the connection was closed or lost.
    End,
    /// An error occurred while recording, either server-side or client-side.
    Error,
}

impl LineType {
    /// Parse a wire token (`msg`, `send`, `start`, `end`, `err`).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "msg" => Some(Self::Message),
            "send" => Some(Self::Send),
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            "err" => Some(Self::Error),
            _ => None,
        }
    }

    /// Wire token for this kind.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Message => "msg",
            Self::Send => "send",
            Self::Start => "start",
            Self::End => "end",
            Self::Error => "err",
        }
    }
}

/// One line of recorded feed traffic.
///
/// `exchange`, `kind` and `timestamp` are always present, but `channel` and
/// `message` are not: their presence is fully determined by `kind`.
///
/// | kind      | channel | message                  |
/// |-----------|---------|--------------------------|
/// | `Message` | yes     | raw protocol payload     |
/// | `Send`    | yes     | raw protocol payload     |
/// | `Start`   | yes     | absent                   |
/// | `End`     | absent  | absent                   |
/// | `Error`   | absent  | absent                   |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line<M> {
    /// Name of the exchange this line was recorded from.
    pub exchange: String,
    /// What kind of line this is.
    pub kind: LineType,
    /// When this line was recorded, in nanoseconds since the UNIX epoch (UTC).
    pub timestamp: i64,
    /// Channel this line is associated with, if the kind carries one.
    pub channel: Option<String>,
    /// Payload, if the kind carries one.
    pub message: Option<M>,
}

/// A line whose message is still raw text, exactly as recorded.
pub type TextLine = Line<String>;

/// Payload of a line that went through the replay decoder.
///
/// `Message` lines decode into a field mapping; every other kind keeps its
/// payload as raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplayMessage {
    /// Decoded field mapping of a `Message` line.
    Fields(Map<String, Value>),
    /// Raw payload of a non-`Message` line, passed through untouched.
    Raw(String),
}

impl ReplayMessage {
    /// Decoded fields, if this is a `Fields` payload.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Fields(map) => Some(map),
            Self::Raw(_) => None,
        }
    }
}

/// A line whose message has been decoded into a structured field mapping.
pub type MappingLine = Line<ReplayMessage>;

/// One channel's state at a point in time, from the snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When this state was taken, in nanoseconds since the UNIX epoch (UTC).
    pub timestamp: i64,
    /// Channel this snapshot belongs to.
    pub channel: String,
    /// Raw payload representing the channel state.
    pub snapshot: String,
}

impl Snapshot {
    /// Convert into a synthetic `Message` line used to seed an exchange's
    /// sequence before its filter data begins.
    pub fn into_line(self, exchange: &str) -> TextLine {
        Line {
            exchange: exchange.to_string(),
            kind: LineType::Message,
            timestamp: self.timestamp,
            channel: Some(self.channel),
            message: Some(self.snapshot),
        }
    }
}

/// Ordered lines of one exchange for one source time unit (a snapshot instant
/// or one filter-endpoint minute window).
pub type Shard = Vec<TextLine>;

/// Exchange name to requested channel names.
///
/// Exchange keys are unique and keep their insertion order; that order is the
/// deterministic tie-break used when merging equal timestamps across
/// exchanges, so it must not depend on fetch completion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    entries: Vec<(String, Vec<String>)>,
}

impl Filter {
    /// Empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; see [`Filter::insert`].
    pub fn exchange<S, I, C>(mut self, exchange: S, channels: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.insert(exchange, channels);
        self
    }

    /// Set the requested channels for an exchange, replacing any previous
    /// entry while keeping the exchange's original position.
    pub fn insert<S, I, C>(&mut self, exchange: S, channels: I)
    where
        S: Into<String>,
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let exchange = exchange.into();
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        if let Some(entry) = self.entries.iter_mut().find(|(e, _)| *e == exchange) {
            entry.1 = channels;
        } else {
            self.entries.push((exchange, channels));
        }
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    /// Channels requested for an exchange, if present.
    pub fn channels(&self, exchange: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(e, _)| e == exchange)
            .map(|(_, c)| c.as_slice())
    }

    /// Number of exchanges in the filter.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the filter names no exchanges at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
