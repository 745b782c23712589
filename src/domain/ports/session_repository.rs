/// Session repository port (trait) for dependency injection.
///
/// Defines the contract for session storage operations that infrastructure
/// adapters must implement. Services depend on this trait, not concrete implementations.
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Session, SessionStatus};

/// Repository trait for session persistence
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Creates a new session
    ///
    /// # Errors
    /// Returns error if the session id already exists or the database fails
    async fn create(&self, session: &Session) -> DomainResult<()>;

    /// Retrieves session by ID
    async fn get(&self, session_id: &str) -> DomainResult<Option<Session>>;

    /// Creates an `active` session under `session_id` unless one exists.
    ///
    /// # Returns
    /// - `true` if the session was created by this call
    async fn ensure(&self, session_id: &str) -> DomainResult<bool>;

    /// Moves an active session to a terminal status. Ending happens at most
    /// once: a second call leaves the row untouched.
    ///
    /// # Returns
    /// - `true` if this call ended the session
    ///
    /// # Errors
    /// Returns `InvalidStateTransition` if `status` is not terminal
    async fn end(
        &self,
        session_id: &str,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Lists sessions, newest first
    async fn list(&self, status: Option<SessionStatus>, limit: usize) -> DomainResult<Vec<Session>>;
}
