//! Error taxonomy for the client.
//!
//! Four families, all surfaced to the caller and never retried internally:
//! validation errors raised synchronously at construction, transport errors
//! from the HTTP boundary, decode errors from malformed bodies or payloads,
//! and any fetch task failure propagated as the whole request's failure.

use thiserror::Error;

use exd_core::{DecodeError, ParseError, TimeError};

/// Any failure the client can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// A malformed request parameter, raised before any network activity.
    #[error("invalid parameter: {0}")]
    Validation(String),

    /// A non-200/404 response from an endpoint, with a best-effort message
    /// extracted from its body.
    #[error("{path}: request failed: {status} {message}")]
    Transport {
        /// Endpoint path that failed.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The endpoint responded with something other than plain text.
    #[error("invalid response content-type, expected \"text/plain\" got {got:?}")]
    ContentType {
        /// The content-type header we received.
        got: String,
    },

    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A malformed endpoint body.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A message payload the replay decoder could not process.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A time argument that failed to normalize.
    #[error(transparent)]
    Time(#[from] TimeError),

    /// A fetch worker disappeared without delivering a result or an error.
    #[error("fetch worker stopped unexpectedly")]
    WorkerGone,
}

/// Convenience alias used throughout the client.
pub type Result<T> = std::result::Result<T, Error>;
