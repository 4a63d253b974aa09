//! Error types for the Airtable client.
//!
//! Every gate in the resilience layer fails closed with its own variant, and
//! downstream failures pass through with their classification intact.

mod error;
mod network;

pub use error::{AirtableError, AirtableResult};
pub use network::NetworkError;
