//! Observability infrastructure for the Airtable client.
//!
//! Provides logging setup, redaction helpers, and metrics.

pub mod logging;
pub mod metrics;

pub use logging::*;
pub use metrics::*;
