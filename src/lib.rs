//! mcp-ledger - transparent recording gateway for MCP tool servers
//!
//! mcp-ledger sits between an MCP client and its tool servers, forwards
//! every message unchanged, and records each tool invocation's metadata into
//! SQLite with strict per-session ordering. Recording never affects what the
//! client sees.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the storage/registry ports
//! - **Service Layer** (`services`): protocol validation, redaction, recording,
//!   forwarding, hub routing, telemetry and the stdio proxy
//! - **Adapters** (`adapters`): SQLite repositories and the axum HTTP surface
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, registry file
//! - **Application Layer** (`application`): the assembled gateway daemon
//! - **CLI Layer** (`cli`): `serve` and `wrap`
//!
//! # Example
//!
//! ```ignore
//! use mcp_ledger::application::{shutdown_signal, GatewayDaemon};
//! use mcp_ledger::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     GatewayDaemon::start(config, None).await?.run(shutdown_signal()).await
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::GatewayDaemon;
pub use domain::models::{
    Config, ErrorCategory, Event, EventStatus, EventType, GatewayMode, Provider, ProviderRegistry, Session,
    SessionStatus,
};
pub use domain::ports::{EventRepository, ProviderRegistrySource, SequenceAllocator, SessionRepository};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{EventRecorder, Gateway, RecordOutcome, Redactor, StdioProxy};
