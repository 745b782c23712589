//! Infrastructure layer module
//!
//! Adapters for the process environment:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Provider registry file source
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod logging;
pub mod registry;
