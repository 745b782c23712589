//! SQLite implementation of the EventRepository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ErrorCategory, Event, EventCompletion, EventStatus, EventType};
use crate::domain::ports::EventRepository;

const EVENT_COLUMNS: &str = "id, session_id, parent_event_id, sequence, event_type, agent_role, agent_name, \
     tool_name, mcp_method, upstream_key, started_at, ended_at, status, error_category, input_json, output_json";

/// SQLite-backed event repository.
#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn insert(&self, event: &Event) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, session_id, parent_event_id, sequence, event_type, agent_role, agent_name,
                tool_name, mcp_method, upstream_key, started_at, ended_at, status,
                error_category, input_json, output_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.session_id)
        .bind(event.parent_event_id.map(|id| id.to_string()))
        .bind(event.sequence)
        .bind(event.event_type.as_str())
        .bind(&event.agent_role)
        .bind(&event.agent_name)
        .bind(&event.tool_name)
        .bind(&event.mcp_method)
        .bind(&event.upstream_key)
        .bind(event.started_at.to_rfc3339())
        .bind(event.ended_at.map(|t| t.to_rfc3339()))
        .bind(event.status.as_str())
        .bind(event.error_category.map(|c| c.as_str()))
        .bind(&event.input_json)
        .bind(&event.output_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finalize(&self, event_id: Uuid, completion: &EventCompletion) -> DomainResult<bool> {
        if !completion.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: EventStatus::Running.as_str().to_string(),
                to: completion.status.as_str().to_string(),
                reason: "an event can only be finalized with a terminal status".to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE events SET
                status = ?,
                ended_at = ?,
                error_category = ?,
                output_json = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(completion.status.as_str())
        .bind(completion.ended_at.to_rfc3339())
        .bind(completion.error_category.map(|c| c.as_str()))
        .bind(&completion.output_json)
        .bind(event_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, event_id: Uuid) -> DomainResult<Option<Event>> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"))
                .bind(event_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Event::try_from).transpose()
    }

    async fn list_by_session(&self, session_id: &str) -> DomainResult<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE session_id = ? ORDER BY sequence ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn cancel_running(&self, session_id: &str, ended_at: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            "UPDATE events SET status = 'cancelled', ended_at = ? WHERE session_id = ? AND status = 'running'",
        )
        .bind(ended_at.to_rfc3339())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    session_id: String,
    parent_event_id: Option<String>,
    sequence: i64,
    event_type: String,
    agent_role: String,
    agent_name: String,
    tool_name: Option<String>,
    mcp_method: Option<String>,
    upstream_key: Option<String>,
    started_at: String,
    ended_at: Option<String>,
    status: String,
    error_category: Option<String>,
    input_json: Option<String>,
    output_json: Option<String>,
}

impl TryFrom<EventRow> for Event {
    type Error = DomainError;

    fn try_from(row: EventRow) -> DomainResult<Self> {
        let event_type = EventType::from_str(&row.event_type).ok_or_else(|| {
            DomainError::SerializationError(format!("invalid event type: {}", row.event_type))
        })?;
        let status = EventStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("invalid event status: {}", row.status))
        })?;
        let error_category = row
            .error_category
            .as_deref()
            .map(|s| {
                ErrorCategory::from_str(s).ok_or_else(|| {
                    DomainError::SerializationError(format!("invalid error category: {s}"))
                })
            })
            .transpose()?;

        Ok(Event {
            id: parse_uuid(&row.id)?,
            session_id: row.session_id,
            parent_event_id: parse_optional_uuid(row.parent_event_id)?,
            sequence: row.sequence,
            event_type,
            agent_role: row.agent_role,
            agent_name: row.agent_name,
            tool_name: row.tool_name,
            mcp_method: row.mcp_method,
            upstream_key: row.upstream_key,
            started_at: parse_datetime(&row.started_at)?,
            ended_at: parse_optional_datetime(row.ended_at)?,
            status,
            error_category,
            input_json: row.input_json,
            output_json: row.output_json,
        })
    }
}
