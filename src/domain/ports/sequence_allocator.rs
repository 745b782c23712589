/// Per-session sequence allocation port.
use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Hands out the next sequence number of a session: 1, 2, 3, ...
///
/// Implementations must perform the read-modify-write as one atomic step in
/// durable storage, so that separate processes sharing the store agree.
/// A value is never handed out twice and never rolled back.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    async fn next_sequence(&self, session_id: &str) -> DomainResult<i64>;

    /// Last value handed out for the session, `0` if none.
    async fn current(&self, session_id: &str) -> DomainResult<i64>;
}
