//! Stateful decoding of raw message lines into typed records.
//!
//! The decoder learns each channel's field schema from the data stream
//! itself: the first `Message` observed on a channel since the last `Start`
//! (or since decoder creation) is a schema definition, not data. Every later
//! message on that channel is decoded against the learned schema, has its
//! `timestamp`/`duration` tagged fields coerced to integers, gets its channel
//! name normalized, and is dropped unless the normalized channel is part of
//! the caller's original filter.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{Filter, Line, LineType, MappingLine, ReplayMessage, TextLine};

/// Field name to type tag, learned from a channel's first message.
type ChannelSchema = Map<String, Value>;

/// A message payload the decoder could not process. Fatal for the owning
/// task; the decoder does not locally recover.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("message payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is valid JSON but not an object.
    #[error("message payload on channel {channel:?} is not a JSON object")]
    NotAnObject {
        /// Channel of the offending line.
        channel: String,
    },

    /// A `Message` line without a channel or message, which the line model
    /// rules out for well-formed input.
    #[error("message line at {timestamp} is missing its channel or payload")]
    IncompleteMessageLine {
        /// Timestamp of the offending line.
        timestamp: i64,
    },

    /// The learned schema references a field the payload does not carry.
    #[error("schema field {field:?} missing from payload on channel {channel:?}")]
    MissingField {
        /// Channel whose schema referenced the field.
        channel: String,
        /// The missing field name.
        field: String,
    },

    /// A `timestamp`/`duration` tagged field is not a decimal string.
    #[error("field {field:?} tagged {tag:?} on channel {channel:?} is not a decimal string")]
    NotADecimalString {
        /// Channel whose schema tagged the field.
        channel: String,
        /// The offending field name.
        field: String,
        /// The schema's type tag.
        tag: String,
    },

    /// A multiplexed bitmex message without the instrument field needed to
    /// normalize its channel name.
    #[error("bitmex message on channel {channel:?} lacks a \"pair\" field")]
    MissingPair {
        /// Raw channel of the offending line.
        channel: String,
    },
}

/// Per-request replay decoder.
///
/// Owns all per-(exchange, channel) schema state for one request; never
/// shared across requests.
#[derive(Debug)]
pub struct ReplayDecoder {
    schemas: HashMap<String, HashMap<String, ChannelSchema>>,
    post_filter: HashMap<String, HashSet<String>>,
}

impl ReplayDecoder {
    /// Decoder gated on the caller's original (replay-level) filter.
    pub fn new(filter: &Filter) -> Self {
        let post_filter = filter
            .entries()
            .iter()
            .map(|(exchange, channels)| {
                (exchange.clone(), channels.iter().cloned().collect())
            })
            .collect();
        Self {
            schemas: HashMap::new(),
            post_filter,
        }
    }

    /// Process one raw line.
    ///
    /// Returns `Ok(None)` for lines that are consumed without output: schema
    /// definitions and messages whose normalized channel is outside the
    /// filter. Non-`Message` kinds pass through with their payload left raw;
    /// `Start` additionally clears every schema learned for its exchange.
    pub fn process(&mut self, line: TextLine) -> Result<Option<MappingLine>, DecodeError> {
        if line.kind == LineType::Start {
            self.schemas.insert(line.exchange.clone(), HashMap::new());
        }
        if line.kind != LineType::Message {
            return Ok(Some(Line {
                exchange: line.exchange,
                kind: line.kind,
                timestamp: line.timestamp,
                channel: line.channel,
                message: line.message.map(ReplayMessage::Raw),
            }));
        }

        let (channel, message) = match (line.channel, line.message) {
            (Some(channel), Some(message)) => (channel, message),
            _ => {
                return Err(DecodeError::IncompleteMessageLine {
                    timestamp: line.timestamp,
                })
            }
        };

        let learned = self.schemas.entry(line.exchange.clone()).or_default();
        let schema = match learned.get(&channel) {
            Some(schema) => schema,
            None => {
                // First message on this channel since the last reset: it
                // defines the schema and is not itself emitted as data.
                learned.insert(channel.clone(), parse_object(&message, &channel)?);
                return Ok(None);
            }
        };

        let mut fields = parse_object(&message, &channel)?;

        let normalized = normalize_channel(&line.exchange, &channel, &fields)?;
        let requested = self
            .post_filter
            .get(&line.exchange)
            .is_some_and(|channels| channels.contains(&normalized));
        if !requested {
            // Purely an output filter; the schema update above still counts.
            return Ok(None);
        }

        coerce_fields(schema, &mut fields, &channel)?;

        Ok(Some(Line {
            exchange: line.exchange,
            kind: LineType::Message,
            timestamp: line.timestamp,
            channel: Some(normalized),
            message: Some(ReplayMessage::Fields(fields)),
        }))
    }
}

fn parse_object(message: &str, channel: &str) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_str(message)? {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotAnObject {
            channel: channel.to_string(),
        }),
    }
}

/// Exchange-specific channel-name normalization.
///
/// bitmex multiplexes several instruments over one generic channel name, so
/// the instrument from the payload's `pair` field is appended — but only when
/// the raw name does not already carry an underscore-separated suffix.
fn normalize_channel(
    exchange: &str,
    channel: &str,
    fields: &Map<String, Value>,
) -> Result<String, DecodeError> {
    if exchange == "bitmex" && !channel.contains('_') {
        let pair = fields
            .get("pair")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::MissingPair {
                channel: channel.to_string(),
            })?;
        return Ok(format!("{channel}_{pair}"));
    }
    Ok(channel.to_string())
}

/// Replace every non-null `timestamp`/`duration` tagged field's decimal
/// string with the integer it encodes.
fn coerce_fields(
    schema: &ChannelSchema,
    fields: &mut Map<String, Value>,
    channel: &str,
) -> Result<(), DecodeError> {
    for (name, tag) in schema {
        let tag = match tag.as_str() {
            Some(tag @ ("timestamp" | "duration")) => tag,
            _ => continue,
        };
        let value = fields
            .get_mut(name)
            .ok_or_else(|| DecodeError::MissingField {
                channel: channel.to_string(),
                field: name.clone(),
            })?;
        match value {
            Value::Null => {}
            Value::String(text) => {
                let parsed: i64 =
                    text.parse()
                        .map_err(|_| DecodeError::NotADecimalString {
                            channel: channel.to_string(),
                            field: name.clone(),
                            tag: tag.to_string(),
                        })?;
                *value = Value::from(parsed);
            }
            _ => {
                return Err(DecodeError::NotADecimalString {
                    channel: channel.to_string(),
                    field: name.clone(),
                    tag: tag.to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Translate a replay-level filter into the raw channels that must be
/// fetched to satisfy it.
///
/// The remote store records bitmex's multiplexed channels under their
/// generic names, so instrument-specific requests collapse to the shared raw
/// channel (`orderBookL2_XBTUSD` → `orderBookL2`, `trade_XBTUSD` → `trade`).
/// Duplicates keep their first-appearance position so the fetch order stays
/// deterministic.
pub fn replay_filter_to_raw(filter: &Filter) -> Filter {
    let mut raw = Filter::new();
    for (exchange, channels) in filter.entries() {
        if exchange == "bitmex" {
            let mut seen = HashSet::new();
            let mut collapsed = Vec::new();
            for channel in channels {
                let mapped = if channel.starts_with("orderBookL2") {
                    "orderBookL2"
                } else if channel.starts_with("trade") {
                    "trade"
                } else {
                    channel.as_str()
                };
                if seen.insert(mapped) {
                    collapsed.push(mapped.to_string());
                }
            }
            raw.insert(exchange.clone(), collapsed);
        } else {
            raw.insert(exchange.clone(), channels.clone());
        }
    }
    raw
}
