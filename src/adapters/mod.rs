//! Adapters for external systems: SQLite storage and the HTTP surface.

pub mod http;
pub mod sqlite;
