//! Wire-format parsing for filter and snapshot endpoint bodies.
//!
//! Both endpoints return line-delimited text with tab-separated fields. The
//! field count of a filter row depends on its kind token:
//!
//! ```text
//! msg \t timestamp \t channel \t message
//! send \t timestamp \t channel \t message
//! start \t timestamp \t channel
//! end \t timestamp
//! err \t timestamp
//! ```
//!
//! Snapshot rows are `timestamp \t channel \t payload`. The message/payload
//! field is always the untouched remainder of the row, so payloads containing
//! tabs survive parsing.

use thiserror::Error;

use crate::types::{Line, LineType, Snapshot, TextLine};

/// A malformed endpoint body. Fatal for the owning fetch task.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// The kind token at the start of a filter row is not one we know.
    #[error("unknown line type token {0:?}")]
    UnknownLineType(String),

    /// A row has fewer fields than its kind requires.
    #[error("malformed {kind} line: expected {expected} tab-separated fields")]
    MissingFields {
        /// Kind token of the offending row.
        kind: String,
        /// Fields the kind requires.
        expected: usize,
    },

    /// The timestamp field is not a decimal integer.
    #[error("invalid timestamp field {0:?}")]
    InvalidTimestamp(String),
}

fn parse_timestamp(field: &str) -> Result<i64, ParseError> {
    field
        .parse()
        .map_err(|_| ParseError::InvalidTimestamp(field.to_string()))
}

fn missing(kind: &str, expected: usize) -> ParseError {
    ParseError::MissingFields {
        kind: kind.to_string(),
        expected,
    }
}

/// Parse one filter endpoint row into a [`TextLine`] for `exchange`.
pub fn parse_filter_line(exchange: &str, row: &str) -> Result<TextLine, ParseError> {
    let token = row.split('\t').next().unwrap_or("");
    let kind = LineType::from_token(token)
        .ok_or_else(|| ParseError::UnknownLineType(token.to_string()))?;

    let (channel, message, timestamp) = match kind {
        LineType::Message | LineType::Send => {
            let mut fields = row.splitn(4, '\t');
            fields.next();
            let timestamp = fields.next().ok_or_else(|| missing(token, 4))?;
            let channel = fields.next().ok_or_else(|| missing(token, 4))?;
            let message = fields.next().ok_or_else(|| missing(token, 4))?;
            (
                Some(channel.to_string()),
                Some(message.to_string()),
                timestamp,
            )
        }
        LineType::Start => {
            let mut fields = row.splitn(3, '\t');
            fields.next();
            let timestamp = fields.next().ok_or_else(|| missing(token, 3))?;
            let channel = fields.next().ok_or_else(|| missing(token, 3))?;
            (Some(channel.to_string()), None, timestamp)
        }
        LineType::End | LineType::Error => {
            let mut fields = row.splitn(2, '\t');
            fields.next();
            let timestamp = fields.next().ok_or_else(|| missing(token, 2))?;
            (None, None, timestamp)
        }
    };

    Ok(Line {
        exchange: exchange.to_string(),
        kind,
        timestamp: parse_timestamp(timestamp)?,
        channel,
        message,
    })
}

/// Parse a whole filter endpoint body. An empty body is a valid empty shard.
pub fn parse_filter_body(exchange: &str, body: &str) -> Result<Vec<TextLine>, ParseError> {
    body.lines()
        .map(|row| parse_filter_line(exchange, row))
        .collect()
}

/// Parse one snapshot endpoint row.
pub fn parse_snapshot_line(row: &str) -> Result<Snapshot, ParseError> {
    let mut fields = row.splitn(3, '\t');
    let timestamp = fields.next().ok_or_else(|| missing("snapshot", 3))?;
    let channel = fields.next().ok_or_else(|| missing("snapshot", 3))?;
    let payload = fields.next().ok_or_else(|| missing("snapshot", 3))?;
    Ok(Snapshot {
        timestamp: parse_timestamp(timestamp)?,
        channel: channel.to_string(),
        snapshot: payload.to_string(),
    })
}

/// Parse a whole snapshot endpoint body.
pub fn parse_snapshot_body(body: &str) -> Result<Vec<Snapshot>, ParseError> {
    body.lines().map(parse_snapshot_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_line_with_tabs_in_payload() {
        let line = parse_filter_line("bitmex", "msg\t1000\ttrade\t{\"a\":\t1}").unwrap();
        assert_eq!(line.kind, LineType::Message);
        assert_eq!(line.timestamp, 1000);
        assert_eq!(line.channel.as_deref(), Some("trade"));
        assert_eq!(line.message.as_deref(), Some("{\"a\":\t1}"));
    }

    #[test]
    fn parses_start_line_without_message() {
        let line = parse_filter_line("bitmex", "start\t1000\ttrade").unwrap();
        assert_eq!(line.kind, LineType::Start);
        assert_eq!(line.channel.as_deref(), Some("trade"));
        assert_eq!(line.message, None);
    }

    #[test]
    fn end_and_error_lines_carry_no_channel() {
        let end = parse_filter_line("bitmex", "end\t2000").unwrap();
        assert_eq!(end.kind, LineType::End);
        assert_eq!(end.channel, None);
        assert_eq!(end.message, None);

        let err = parse_filter_line("bitmex", "err\t3000").unwrap();
        assert_eq!(err.kind, LineType::Error);
        assert_eq!(err.channel, None);
    }

    #[test]
    fn unknown_kind_token_is_fatal() {
        assert_eq!(
            parse_filter_line("bitmex", "snapshot\t1000\ttrade"),
            Err(ParseError::UnknownLineType("snapshot".to_string()))
        );
    }

    #[test]
    fn truncated_message_line_is_rejected() {
        assert!(matches!(
            parse_filter_line("bitmex", "msg\t1000\ttrade"),
            Err(ParseError::MissingFields { expected: 4, .. })
        ));
    }

    #[test]
    fn empty_body_is_an_empty_shard() {
        assert!(parse_filter_body("bitmex", "").unwrap().is_empty());
    }

    #[test]
    fn parses_snapshot_rows() {
        let rows = "1000\torderBookL2\t[{\"id\":1}]\n2000\ttrade\t[]";
        let snapshots = parse_snapshot_body(rows).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].channel, "orderBookL2");
        assert_eq!(snapshots[0].snapshot, "[{\"id\":1}]");
        assert_eq!(snapshots[1].timestamp, 2000);
    }

    #[test]
    fn non_numeric_timestamp_is_rejected() {
        assert_eq!(
            parse_snapshot_line("abc\ttrade\t[]"),
            Err(ParseError::InvalidTimestamp("abc".to_string()))
        );
    }
}
