//! Logging configuration and utilities.
//!
//! Structured logging via `tracing`, plus helpers that keep the Airtable
//! API key out of log output.

use crate::errors::{AirtableError, AirtableResult};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The minimum log level to capture
    pub level: LogLevel,
    /// The output format for log messages
    pub format: LogFormat,
    /// Whether to include the module target in log output
    pub include_target: bool,
    /// Whether to include file and line number in log output
    pub include_file_line: bool,
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Trace-level logging (most verbose)
    Trace,
    /// Debug-level logging
    Debug,
    /// Info-level logging
    Info,
    /// Warning-level logging
    Warn,
    /// Error-level logging (least verbose)
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<LogLevel> for tracing::level_filters::LevelFilter {
    fn from(level: LogLevel) -> Self {
        Level::from(level).into()
    }
}

impl std::str::FromStr for LogLevel {
    type Err = AirtableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(AirtableError::Configuration {
                message: format!("Unknown log level: {}", other),
            }),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (for development)
    Pretty,
    /// JSON format (for structured logging in production)
    Json,
    /// Compact format
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            include_target: true,
            include_file_line: false,
        }
    }
}

impl LoggingConfig {
    /// Creates a new logging configuration with default settings.
    ///
    /// # Examples
    ///
    /// ```
    /// use integrations_airtable::observability::{LoggingConfig, LogLevel, LogFormat};
    ///
    /// let config = LoggingConfig::new();
    /// assert_eq!(config.level, LogLevel::Info);
    /// assert_eq!(config.format, LogFormat::Pretty);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets whether to include the module target.
    pub fn with_target(mut self, include: bool) -> Self {
        self.include_target = include;
        self
    }

    /// Sets whether to include file and line number.
    pub fn with_file_line(mut self, include: bool) -> Self {
        self.include_file_line = include;
        self
    }

    /// Initialize logging with this configuration.
    ///
    /// `RUST_LOG` directives are honored on top of the configured level.
    /// This should be called once at application startup.
    ///
    /// ```no_run
    /// use integrations_airtable::observability::{LoggingConfig, LogFormat};
    ///
    /// # fn main() -> integrations_airtable::AirtableResult<()> {
    /// LoggingConfig::new().with_format(LogFormat::Json).init()?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a global subscriber is already set.
    pub fn init(self) -> AirtableResult<()> {
        let filter = EnvFilter::from_default_env().add_directive(Level::from(self.level).into());

        let result = match self.format {
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_ansi(true)
                        .with_target(self.include_target)
                        .with_file(self.include_file_line)
                        .with_line_number(self.include_file_line),
                )
                .try_init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(self.include_target))
                .try_init(),
            LogFormat::Compact => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_target(self.include_target))
                .try_init(),
        };

        result.map_err(|e| AirtableError::Configuration {
            message: format!("Failed to initialize logging: {}", e),
        })
    }
}

/// Redact a token, preserving a short prefix for debugging.
///
/// Airtable personal access tokens start with `pat`, so the prefix is enough
/// to tell token kinds apart without leaking the secret part.
pub fn redact_token(token: &str) -> String {
    match token.char_indices().nth(8) {
        Some((cut, _)) if token.len() > 12 => format!("{}...[REDACTED]", &token[..cut]),
        _ => "[REDACTED]".to_string(),
    }
}

/// Redact a URL, hiding sensitive query parameters
pub fn redact_url(url: &str) -> String {
    let Some(query_start) = url.find('?') else {
        return url.to_string();
    };
    let (base, query) = url.split_at(query_start);
    let sensitive = ["token", "key", "api_key", "secret", "password", "access_token"];

    let params: Vec<String> = query
        .trim_start_matches('?')
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((name, _)) if sensitive.iter().any(|s| name.eq_ignore_ascii_case(s)) => {
                format!("{}=[REDACTED]", name)
            }
            _ => pair.to_string(),
        })
        .collect();

    format!("{}?{}", base, params.join("&"))
}

/// Log an outgoing Airtable request.
pub fn log_request(method: &str, url: &str) {
    tracing::debug!(method, url = %redact_url(url), "Outgoing request");
}

/// Log an Airtable response.
pub fn log_response(status: u16, duration_ms: u64) {
    tracing::debug!(status, duration_ms, "Incoming response");
}
