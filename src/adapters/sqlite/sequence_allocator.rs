//! Atomic per-session sequence allocation backed by SQLite.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::ports::SequenceAllocator;

/// Allocates sequence numbers from the `session_sequences` table.
///
/// The upsert creates the counter at 1 on first use and otherwise increments
/// it, returning the new value in the same statement. SQLite runs a single
/// statement as one write transaction, so two allocations for the same
/// session (from any connection or process) serialize on the database lock
/// and can never observe the same counter value.
#[derive(Clone)]
pub struct SqliteSequenceAllocator {
    pool: SqlitePool,
}

impl SqliteSequenceAllocator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SequenceAllocator for SqliteSequenceAllocator {
    async fn next_sequence(&self, session_id: &str) -> DomainResult<i64> {
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO session_sequences (session_id, last_sequence)
            VALUES (?, 1)
            ON CONFLICT(session_id) DO UPDATE SET
                last_sequence = last_sequence + 1
            RETURNING last_sequence
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sequence)
    }

    async fn current(&self, session_id: &str) -> DomainResult<i64> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT last_sequence FROM session_sequences WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(current.unwrap_or(0))
    }
}
