//! Domain layer for the mcp-ledger gateway
//!
//! Core models and the ports that storage and transport adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
