//! Reqwest-backed HTTP transport.

use super::{DownstreamRequest, DownstreamResponse, HttpTransport};
use crate::errors::{AirtableError, AirtableResult};
use crate::observability::{log_request, log_response};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Reqwest-based HTTP transport implementation
pub struct ReqwestTransport {
    client: Client,
    api_key: SecretString,
}

impl ReqwestTransport {
    /// Create a new reqwest transport authenticating with `api_key`
    pub fn new(api_key: SecretString, timeout: Duration) -> AirtableResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("integrations-airtable/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AirtableError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, api_key })
    }

    fn map_http_error(status: StatusCode, headers: &HeaderMap, body: &str) -> AirtableError {
        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            parse_retry_after(headers)
        } else {
            None
        };

        AirtableError::Api {
            status: status.as_u16(),
            message: error_message(status, body),
            retry_after,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: DownstreamRequest) -> AirtableResult<DownstreamResponse> {
        log_request(request.method.as_str(), request.url.as_str());
        let started = Instant::now();

        let mut builder = self
            .client
            .request(request.method, request.url)
            .bearer_auth(self.api_key.expose_secret());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        log_response(status.as_u16(), started.elapsed().as_millis() as u64);

        if !status.is_success() {
            return Err(Self::map_http_error(status, &headers, &text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };

        Ok(DownstreamResponse {
            status: status.as_u16(),
            body,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Extract the message from an Airtable error body.
///
/// Airtable returns either `{"error": {"type": ..., "message": ...}}` or
/// `{"error": "NOT_FOUND"}`; anything else falls back to the raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    match error {
        Some(Value::String(kind)) => kind.clone(),
        Some(Value::Object(obj)) => {
            let kind = obj.get("type").and_then(Value::as_str);
            let message = obj.get("message").and_then(Value::as_str);
            match (kind, message) {
                (Some(kind), Some(message)) => format!("{}: {}", kind, message),
                (Some(kind), None) => kind.to_string(),
                (None, Some(message)) => message.to_string(),
                (None, None) => body.to_string(),
            }
        }
        _ if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
        _ => body.to_string(),
    }
}
