//! Transport seam between the resilience layer and the network.
//!
//! The resilience layer only needs to know how to send one request and how
//! to identify duplicate reads; everything else about HTTP stays behind
//! [`HttpTransport`].

mod http_transport;

pub use http_transport::ReqwestTransport;

use crate::errors::AirtableResult;
use async_trait::async_trait;
use http::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

/// A single outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamRequest {
    /// HTTP method
    pub method: Method,
    /// Fully resolved URL
    pub url: Url,
    /// JSON body, if any
    pub body: Option<Value>,
}

impl DownstreamRequest {
    /// Create a request without a body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
        }
    }

    /// Attach a JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// De-duplication key for this request
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url, self.body.as_ref())
    }
}

/// A successful response
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed JSON body; `Null` when the body was empty
    pub body: Value,
}

/// HTTP transport trait for making requests to the Airtable API.
///
/// Implementations return `Ok` only for 2xx responses and map everything
/// else onto [`AirtableError`](crate::AirtableError) so retry classification
/// works on the result.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request
    async fn send(&self, request: DownstreamRequest) -> AirtableResult<DownstreamResponse>;
}

/// Stable hash identifying identical requests.
///
/// SHA-256 over the method, the URL and the canonical JSON encoding of the
/// body. `serde_json` serializes object keys in sorted order, so bodies that
/// differ only in key order share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    /// Derive the key for a request
    pub fn new(method: &Method, url: &Url, body: Option<&Value>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(url.as_str().as_bytes());
        hasher.update([0u8]);
        if let Some(body) = body {
            hasher.update(body.to_string().as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether repeating `method` has no additional effect, making concurrent
/// duplicates safe to share
pub fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}
