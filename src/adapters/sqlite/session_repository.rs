//! SQLite implementation of the SessionRepository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{parse_datetime, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Session, SessionStatus};
use crate::domain::ports::SessionRepository;

#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create(&self, session: &Session) -> DomainResult<()> {
        sqlx::query("INSERT INTO sessions (id, started_at, ended_at, status) VALUES (?, ?, ?, ?)")
            .bind(&session.id)
            .bind(session.started_at.to_rfc3339())
            .bind(session.ended_at.map(|t| t.to_rfc3339()))
            .bind(session.status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> DomainResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, started_at, ended_at, status FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn ensure(&self, session_id: &str) -> DomainResult<bool> {
        let result = sqlx::query(
            "INSERT INTO sessions (id, started_at, status) VALUES (?, ?, 'active') ON CONFLICT(id) DO NOTHING",
        )
        .bind(session_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn end(
        &self,
        session_id: &str,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        if !status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: SessionStatus::Active.as_str().to_string(),
                to: status.as_str().to_string(),
                reason: "a session can only end in a terminal status".to_string(),
            });
        }

        let result = sqlx::query(
            "UPDATE sessions SET status = ?, ended_at = ? WHERE id = ? AND ended_at IS NULL",
        )
        .bind(status.as_str())
        .bind(ended_at.to_rfc3339())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, status: Option<SessionStatus>, limit: usize) -> DomainResult<Vec<Session>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<SessionRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT id, started_at, ended_at, status FROM sessions WHERE status = ? ORDER BY started_at DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, started_at, ended_at, status FROM sessions ORDER BY started_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Session::try_from).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    started_at: String,
    ended_at: Option<String>,
    status: String,
}

impl TryFrom<SessionRow> for Session {
    type Error = DomainError;

    fn try_from(row: SessionRow) -> DomainResult<Self> {
        let status = SessionStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("invalid session status: {}", row.status))
        })?;

        Ok(Session {
            id: row.id,
            started_at: parse_datetime(&row.started_at)?,
            ended_at: parse_optional_datetime(row.ended_at)?,
            status,
        })
    }
}
