//! HTTP transport and the low-level endpoint surface.
//!
//! [`HttpTransport`] is the boundary collaborator every fetch goes through:
//! it issues an authenticated GET, lets `reqwest` transparently decompress
//! gzip bodies, and maps status codes. A `404` is a valid "no data" outcome
//! that callers turn into an empty shard; any other non-200 status is a
//! transport error carrying a best-effort message from the response body.
//!
//! [`HttpApi`] exposes the two endpoints directly (`filter/{exchange}/
//! {minute}` and `snapshot/{exchange}/{nanos}`) for callers that want single
//! shards without the merge machinery.

use std::time::Duration;

use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use exd_core::{
    parse,
    time::{AnyDateTime, AnyMinute},
    types::{Snapshot, TextLine},
    validate,
};

use crate::error::{Error, Result};
use crate::settings::ClientSettings;

/// Raw outcome of one endpoint download.
#[derive(Debug)]
pub struct DownloadResponse {
    /// Either `200 OK` or `404 Not Found`.
    pub status: StatusCode,
    /// Decompressed response body.
    pub body: String,
}

/// Shared, read-only HTTP boundary. Cheap to clone; workers never mutate it.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    /// Build the transport from validated settings.
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        if !validate::is_valid_api_key(&settings.api_key) {
            return Err(Error::Validation(
                "\"api_key\" must be a non-empty string of alphanumerics, hyphens or underscores"
                    .to_string(),
            ));
        }
        if !settings.timeout_secs.is_finite() || settings.timeout_secs <= 0.0 {
            return Err(Error::Validation(format!(
                "\"timeout_secs\" must be a finite positive number: {}",
                settings.timeout_secs
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    /// Download one resource. `query` keys may repeat (`channels`).
    pub async fn download(&self, path: &str, query: &[(&str, String)]) -> Result<DownloadResponse> {
        let url = format!("{}{}", self.base_url, path);
        debug!(event_type = "download_start", path = %path, "requesting endpoint");

        let response = self
            .client
            .get(&url)
            .query(query)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body);
            warn!(
                event_type = "download_failed",
                path = %path,
                status = status.as_u16(),
                message = %message,
                "endpoint returned an error status"
            );
            return Err(Error::Transport {
                path: path.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("text/plain") {
            return Err(Error::ContentType { got: content_type });
        }

        let body = response.text().await?;
        debug!(
            event_type = "download_complete",
            path = %path,
            status = status.as_u16(),
            bytes = body.len(),
            "endpoint responded"
        );
        Ok(DownloadResponse { status, body })
    }
}

/// Best-effort error message from a JSON body; falls back to the raw text.
fn extract_error_message(body: &str) -> String {
    if let Ok(Value::Object(object)) = serde_json::from_str(body) {
        for key in ["error", "message", "Message"] {
            if let Some(Value::String(message)) = object.get(key) {
                return message.clone();
            }
        }
    }
    body.trim().to_string()
}

pub(crate) fn check_exchange(exchange: &str) -> Result<()> {
    if !validate::is_valid_name(exchange) {
        return Err(Error::Validation(format!(
            "\"exchange\" must be a non-empty identifier: {exchange:?}"
        )));
    }
    Ok(())
}

pub(crate) fn check_channels(channels: &[String]) -> Result<()> {
    for channel in channels {
        if !validate::is_valid_name(channel) {
            return Err(Error::Validation(format!(
                "\"channels\" must be a list of identifiers: {channel:?}"
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_format(format: Option<&str>) -> Result<()> {
    if let Some(format) = format {
        if !validate::is_valid_name(format) {
            return Err(Error::Validation(format!(
                "\"format\" must be an identifier: {format:?}"
            )));
        }
    }
    Ok(())
}

/// Low-level endpoint calls, one HTTP request per call.
#[derive(Debug, Clone)]
pub struct HttpApi {
    transport: HttpTransport,
}

impl HttpApi {
    pub(crate) fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    /// Call the filter endpoint for one exchange and minute window.
    ///
    /// `start`/`end` clip the window server-side when they fall inside it.
    /// A `404` is a valid empty result.
    pub async fn filter(
        &self,
        exchange: &str,
        channels: &[String],
        minute: impl Into<AnyMinute>,
        format: Option<&str>,
        start: Option<AnyDateTime>,
        end: Option<AnyDateTime>,
    ) -> Result<Vec<TextLine>> {
        check_exchange(exchange)?;
        check_channels(channels)?;
        check_format(format)?;

        let minute = minute.into().to_minute()?;
        let mut query: Vec<(&str, String)> = channels
            .iter()
            .map(|channel| ("channels", channel.clone()))
            .collect();
        if let Some(format) = format {
            query.push(("format", format.to_string()));
        }
        if let Some(start) = start {
            query.push(("start", start.to_nanos()?.to_string()));
        }
        if let Some(end) = end {
            query.push(("end", end.to_nanos()?.to_string()));
        }

        let path = format!("filter/{exchange}/{minute}");
        let response = self.transport.download(&path, &query).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Ok(parse::parse_filter_body(exchange, &response.body)?)
    }

    /// Call the snapshot endpoint for one exchange at one instant.
    /// A `404` is a valid empty result.
    pub async fn snapshot(
        &self,
        exchange: &str,
        channels: &[String],
        at: impl Into<AnyDateTime>,
        format: Option<&str>,
    ) -> Result<Vec<Snapshot>> {
        check_exchange(exchange)?;
        check_channels(channels)?;
        check_format(format)?;

        let at = at.into().to_nanos()?;
        let mut query: Vec<(&str, String)> = channels
            .iter()
            .map(|channel| ("channels", channel.clone()))
            .collect();
        if let Some(format) = format {
            query.push(("format", format.to_string()));
        }

        let path = format!("snapshot/{exchange}/{at}");
        let response = self.transport.download(&path, &query).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Ok(parse::parse_snapshot_body(&response.body)?)
    }
}
