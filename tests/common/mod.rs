//! Common test utilities for integration tests
//!
//! Shared fixtures for building a recording gateway over a throwaway
//! SQLite database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mcp_ledger::adapters::sqlite::{
    create_migrated_test_pool, SqliteEventRepository, SqliteSequenceAllocator, SqliteSessionRepository,
};
use mcp_ledger::domain::models::{HttpProvider, Provider, ProviderRegistry};
use mcp_ledger::domain::ports::StaticRegistry;
use mcp_ledger::services::{AgentIdentity, EventRecorder, Gateway, GatewayTarget, HttpForwarder, HubRouter, Redactor};
use sqlx::SqlitePool;

pub const SESSION_ID: &str = "test-session";

/// Recorder plus direct handles on its repositories.
pub struct Store {
    pub pool: SqlitePool,
    pub sessions: Arc<SqliteSessionRepository>,
    pub events: Arc<SqliteEventRepository>,
    pub recorder: Arc<EventRecorder>,
}

pub async fn store() -> Store {
    let pool = create_migrated_test_pool().await.expect("Failed to create test pool");
    let sessions = Arc::new(SqliteSessionRepository::new(pool.clone()));
    let events = Arc::new(SqliteEventRepository::new(pool.clone()));
    let recorder = Arc::new(EventRecorder::new(
        sessions.clone(),
        events.clone(),
        Arc::new(SqliteSequenceAllocator::new(pool.clone())),
        Redactor::new(["password", "token"], 4096),
    ));
    Store {
        pool,
        sessions,
        events,
        recorder,
    }
}

pub fn http_provider(id: &str, url: impl Into<String>) -> Provider {
    Provider::Http(HttpProvider {
        id: id.to_string(),
        url: url.into(),
        headers: Default::default(),
    })
}

pub fn hub_gateway(store: &Store, providers: Vec<Provider>, request_timeout: Duration) -> Gateway {
    let target = GatewayTarget::Hub {
        registry: Arc::new(StaticRegistry(ProviderRegistry::new(providers))),
    };
    let router = HubRouter::new(HttpForwarder::new(request_timeout), Duration::from_secs(2));
    Gateway::new(
        target,
        router,
        store.recorder.clone(),
        SESSION_ID,
        AgentIdentity::new("main", "integration-test"),
    )
}
