/// Event repository port.
///
/// Event rows are write-once-then-finalized: inserted complete, or inserted
/// `running` and finalized once. The core never deletes them.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Event, EventCompletion};

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Inserts an event whose sequence has already been allocated.
    ///
    /// # Errors
    /// Fails on a duplicate `(session_id, sequence)` or a missing session
    async fn insert(&self, event: &Event) -> DomainResult<()>;

    /// Applies a terminal update to a `running` event.
    ///
    /// # Returns
    /// - `false` if the event does not exist or is already terminal
    async fn finalize(&self, event_id: Uuid, completion: &EventCompletion) -> DomainResult<bool>;

    async fn get(&self, event_id: Uuid) -> DomainResult<Option<Event>>;

    /// Events of a session in sequence order
    async fn list_by_session(&self, session_id: &str) -> DomainResult<Vec<Event>>;

    /// Marks every still-running event of a session as cancelled.
    ///
    /// # Returns
    /// Number of events updated
    async fn cancel_running(&self, session_id: &str, ended_at: DateTime<Utc>) -> DomainResult<u64>;
}
