//! Time argument conversion.
//!
//! The request surfaces accept time arguments as raw integers, ISO-8601-like
//! strings, or [`chrono`] values. Everything is normalized to nanoseconds
//! since the UNIX epoch (UTC) or, for the filter endpoint path segment, to
//! whole minutes since the epoch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// Nanoseconds in one filter-endpoint minute window.
pub const NANOS_PER_MINUTE: i64 = 60 * 1_000_000_000;

/// A time argument that failed to normalize.
#[derive(Debug, Error, PartialEq)]
pub enum TimeError {
    /// The string is not an ISO-8601-like date or datetime.
    #[error("unrecognized date-time string {0:?}")]
    Unparseable(String),

    /// The value does not fit in nanoseconds since the epoch.
    #[error("date-time out of nanosecond range: {0}")]
    OutOfRange(String),
}

/// A point in time: integer nanoseconds, an ISO-8601-like string, or a
/// structured datetime.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyDateTime {
    /// Already in nanoseconds since the UNIX epoch (UTC).
    Nanos(i64),
    /// ISO-8601-like string, e.g. `2020-01-01T00:00:00Z` or `2020-01-01`.
    Text(String),
    /// Structured UTC datetime.
    DateTime(DateTime<Utc>),
}

impl AnyDateTime {
    /// Normalize to nanoseconds since the UNIX epoch.
    pub fn to_nanos(&self) -> Result<i64, TimeError> {
        match self {
            Self::Nanos(nanos) => Ok(*nanos),
            Self::Text(text) => datetime_to_nanos(&parse_datetime(text)?),
            Self::DateTime(datetime) => datetime_to_nanos(datetime),
        }
    }
}

impl From<i64> for AnyDateTime {
    fn from(nanos: i64) -> Self {
        Self::Nanos(nanos)
    }
}

impl From<&str> for AnyDateTime {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for AnyDateTime {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<DateTime<Utc>> for AnyDateTime {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::DateTime(datetime)
    }
}

/// A minute argument: integer minutes since the epoch, an ISO-8601-like
/// string, or a structured datetime.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyMinute {
    /// Already in whole minutes since the UNIX epoch (UTC).
    Minutes(i64),
    /// ISO-8601-like string; truncated down to the containing minute.
    Text(String),
    /// Structured UTC datetime; truncated down to the containing minute.
    DateTime(DateTime<Utc>),
}

impl AnyMinute {
    /// Normalize to whole minutes since the UNIX epoch.
    pub fn to_minute(&self) -> Result<i64, TimeError> {
        match self {
            Self::Minutes(minutes) => Ok(*minutes),
            Self::Text(text) => Ok(parse_datetime(text)?.timestamp().div_euclid(60)),
            Self::DateTime(datetime) => Ok(datetime.timestamp().div_euclid(60)),
        }
    }
}

impl From<i64> for AnyMinute {
    fn from(minutes: i64) -> Self {
        Self::Minutes(minutes)
    }
}

impl From<&str> for AnyMinute {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<DateTime<Utc>> for AnyMinute {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::DateTime(datetime)
    }
}

/// Minute window containing a nanosecond timestamp.
pub fn nanos_to_minute(nanos: i64) -> i64 {
    nanos.div_euclid(NANOS_PER_MINUTE)
}

fn datetime_to_nanos(datetime: &DateTime<Utc>) -> Result<i64, TimeError> {
    datetime
        .timestamp_nanos_opt()
        .ok_or_else(|| TimeError::OutOfRange(datetime.to_rfc3339()))
}

fn parse_datetime(text: &str) -> Result<DateTime<Utc>, TimeError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    Err(TimeError::Unparseable(text.to_string()))
}
