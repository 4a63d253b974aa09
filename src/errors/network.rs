//! Transport-level error classification.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Transport failure, annotated with a resolved diagnostic code.
///
/// The diagnostic only clarifies the message; whether the error is retried
/// depends on the variant alone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Host name could not be resolved
    #[error("DNS lookup failed (ENOTFOUND), check the base URL and network: {message}")]
    Dns {
        /// Underlying error message
        message: String,
    },

    /// Remote end refused the connection
    #[error("Connection refused (ECONNREFUSED), is the API reachable: {message}")]
    ConnectionRefused {
        /// Underlying error message
        message: String,
    },

    /// Connection was reset or aborted mid-request
    #[error("Connection reset (ECONNRESET): {message}")]
    ConnectionReset {
        /// Underlying error message
        message: String,
    },

    /// Request timed out
    #[error("Request timed out (ETIMEDOUT): {message}")]
    Timeout {
        /// Underlying error message
        message: String,
    },

    /// TLS handshake or certificate validation failed
    #[error("TLS certificate error (CERT_INVALID), check proxy or CA configuration: {message}")]
    Tls {
        /// Underlying error message
        message: String,
    },

    /// Any other transport failure
    #[error("Transport error: {message}")]
    Other {
        /// Underlying error message
        message: String,
    },
}

impl NetworkError {
    /// Diagnostic code for the failure
    pub fn code(&self) -> &'static str {
        match self {
            NetworkError::Dns { .. } => "ENOTFOUND",
            NetworkError::ConnectionRefused { .. } => "ECONNREFUSED",
            NetworkError::ConnectionReset { .. } => "ECONNRESET",
            NetworkError::Timeout { .. } => "ETIMEDOUT",
            NetworkError::Tls { .. } => "CERT_INVALID",
            NetworkError::Other { .. } => "ENETWORK",
        }
    }

    /// Whether a retry can plausibly succeed.
    ///
    /// Only DNS, refused, reset and timed-out connections are retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetworkError::Dns { .. }
                | NetworkError::ConnectionRefused { .. }
                | NetworkError::ConnectionReset { .. }
                | NetworkError::Timeout { .. }
        )
    }

    /// Classify a failure from its message, the innermost I/O error kind,
    /// and whether the client reported a timeout.
    pub fn classify(message: &str, io_kind: Option<io::ErrorKind>, timed_out: bool) -> Self {
        let lower = message.to_ascii_lowercase();
        let message = message.to_string();

        if timed_out || io_kind == Some(io::ErrorKind::TimedOut) || lower.contains("timed out") {
            return NetworkError::Timeout { message };
        }

        match io_kind {
            Some(io::ErrorKind::ConnectionRefused) => {
                return NetworkError::ConnectionRefused { message }
            }
            Some(
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe,
            ) => return NetworkError::ConnectionReset { message },
            _ => {}
        }

        if lower.contains("connection refused") {
            NetworkError::ConnectionRefused { message }
        } else if lower.contains("connection reset")
            || lower.contains("broken pipe")
            || lower.contains("connection closed before message completed")
        {
            NetworkError::ConnectionReset { message }
        } else if lower.contains("dns error")
            || lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
            || lower.contains("no such host")
        {
            NetworkError::Dns { message }
        } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
            NetworkError::Tls { message }
        } else {
            NetworkError::Other { message }
        }
    }

    /// Classify a `reqwest` failure by walking its source chain
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let mut io_kind = None;
        let mut messages = vec![err.to_string()];
        let mut source = err.source();
        while let Some(inner) = source {
            if let Some(io_err) = inner.downcast_ref::<io::Error>() {
                io_kind = Some(io_err.kind());
            }
            messages.push(inner.to_string());
            source = inner.source();
        }

        Self::classify(&messages.join(": "), io_kind, err.is_timeout())
    }
}
