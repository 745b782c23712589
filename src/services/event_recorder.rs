//! Event recorder: turns an observed call into one durable, ordered event.
//!
//! Every public operation returns a [`RecordOutcome`] instead of a `Result`.
//! Storage being slow, broken or gone is logged here and nowhere else;
//! forwarding code ignores a failed outcome on purpose.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::error_category::derive_error_category;
use super::redaction::Redactor;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ErrorCategory, Event, EventCompletion, EventStatus, EventType};
use crate::domain::ports::{EventRepository, SequenceAllocator, SessionRepository};

/// Who made the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub role: String,
    pub name: String,
}

impl AgentIdentity {
    pub fn new(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: name.into(),
        }
    }
}

/// Raw description of an observed call. Payloads are unredacted here and
/// are redacted by the recorder before anything else looks at them.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub session_id: String,
    pub parent_event_id: Option<Uuid>,
    pub event_type: EventType,
    pub agent: AgentIdentity,
    pub tool_name: Option<String>,
    pub mcp_method: Option<String>,
    pub upstream_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub input: Option<Value>,
}

impl CallRecord {
    /// A `tools/call` observed at `started_at`.
    pub fn tool_call(
        session_id: impl Into<String>,
        agent: AgentIdentity,
        tool_name: Option<String>,
        upstream_key: Option<String>,
        input: Option<Value>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            parent_event_id: None,
            event_type: EventType::ToolCall,
            agent,
            tool_name,
            mcp_method: Some("tools/call".to_string()),
            upstream_key,
            started_at: Utc::now(),
            input,
        }
    }
}

/// How a call ended.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub status: EventStatus,
    pub ended_at: DateTime<Utc>,
    pub output: Option<Value>,
    /// Set when the failure happened before any output existed to derive
    /// a category from (for example an unresolvable provider).
    pub category_override: Option<ErrorCategory>,
}

impl CallResult {
    pub fn new(status: EventStatus, output: Option<Value>) -> Self {
        Self {
            status,
            ended_at: Utc::now(),
            output,
            category_override: None,
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category_override = Some(category);
        self
    }
}

/// Result of a recording attempt. Callers on the forwarding path may drop
/// it: a failure has already been logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { event_id: Uuid, sequence: i64 },
    Updated { event_id: Uuid },
    Failed { reason: String },
    Disabled,
}

impl RecordOutcome {
    pub fn event_id(&self) -> Option<Uuid> {
        match self {
            Self::Recorded { event_id, .. } | Self::Updated { event_id } => Some(*event_id),
            Self::Failed { .. } | Self::Disabled => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Recording work detached from the request that produced it.
///
/// Replies go out before their event is written; `drain` waits for what is
/// still in flight, which shutdown does before closing the session.
#[derive(Default)]
pub struct RecordingTasks {
    tasks: Mutex<JoinSet<()>>,
}

impl RecordingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(work);
    }

    /// Wait for every task spawned so far.
    pub async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.tasks.lock().await);
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "recording task aborted");
            }
        }
    }
}

pub struct EventRecorder {
    sessions: Arc<dyn SessionRepository>,
    events: Arc<dyn EventRepository>,
    sequences: Arc<dyn SequenceAllocator>,
    redactor: Redactor,
    enabled: bool,
}

impl EventRecorder {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        events: Arc<dyn EventRepository>,
        sequences: Arc<dyn SequenceAllocator>,
        redactor: Redactor,
    ) -> Self {
        Self {
            sessions,
            events,
            sequences,
            redactor,
            enabled: true,
        }
    }

    /// Turn recording off; every operation then returns `Disabled`.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Record a completed call as a single row.
    pub async fn record(&self, call: CallRecord, result: CallResult) -> RecordOutcome {
        if !self.enabled {
            return RecordOutcome::Disabled;
        }
        let tool = call.tool_name.clone();
        match self.try_record(call, Some(result)).await {
            Ok((event_id, sequence)) => {
                tracing::debug!(%event_id, sequence, tool = ?tool, "event recorded");
                RecordOutcome::Recorded { event_id, sequence }
            }
            Err(e) => Self::failed(&e, "record"),
        }
    }

    /// Record a call that is still in flight; finish it later with [`Self::finish`].
    pub async fn start(&self, call: CallRecord) -> RecordOutcome {
        if !self.enabled {
            return RecordOutcome::Disabled;
        }
        match self.try_record(call, None).await {
            Ok((event_id, sequence)) => RecordOutcome::Recorded { event_id, sequence },
            Err(e) => Self::failed(&e, "start"),
        }
    }

    /// Finalize an event created by [`Self::start`].
    pub async fn finish(&self, event_id: Uuid, result: CallResult) -> RecordOutcome {
        if !self.enabled {
            return RecordOutcome::Disabled;
        }
        let completion = self.completion(&result);
        match self.events.finalize(event_id, &completion).await {
            Ok(true) => RecordOutcome::Updated { event_id },
            Ok(false) => Self::failed(&DomainError::EventNotFound(event_id.to_string()), "finish"),
            Err(e) => Self::failed(&e, "finish"),
        }
    }

    /// Make sure a session row exists for `session_id`. Returns `false` when
    /// recording is off or storage refused.
    pub async fn ensure_session(&self, session_id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match self.sessions.ensure(session_id).await {
            Ok(created) => {
                if created {
                    tracing::info!(session_id, "session opened");
                }
                true
            }
            Err(e) => {
                Self::failed(&e, "ensure_session");
                false
            }
        }
    }

    async fn try_record(&self, call: CallRecord, result: Option<CallResult>) -> DomainResult<(Uuid, i64)> {
        // Redact first: nothing downstream of this point sees raw payloads.
        let input_json = call.input.as_ref().map(|v| self.redactor.redact_and_render(v));
        let completion = result.as_ref().map(|r| self.completion(r));

        self.sessions.ensure(&call.session_id).await?;
        let sequence = self.sequences.next_sequence(&call.session_id).await?;

        let event = Event {
            id: Uuid::new_v4(),
            session_id: call.session_id,
            parent_event_id: call.parent_event_id,
            sequence,
            event_type: call.event_type,
            agent_role: call.agent.role,
            agent_name: call.agent.name,
            tool_name: call.tool_name,
            mcp_method: call.mcp_method,
            upstream_key: call.upstream_key,
            started_at: call.started_at,
            ended_at: completion.as_ref().map(|c| c.ended_at),
            status: completion.as_ref().map_or(EventStatus::Running, |c| c.status),
            error_category: completion.as_ref().and_then(|c| c.error_category),
            input_json,
            output_json: completion.and_then(|c| c.output_json),
        };

        // A failed insert leaves a gap in the sequence; that is accepted,
        // reusing the number is not.
        self.events.insert(&event).await?;
        Ok((event.id, sequence))
    }

    fn completion(&self, result: &CallResult) -> EventCompletion {
        let redacted = result.output.as_ref().map(|v| self.redactor.redact(v));
        let error_category = if result.status.is_failure() {
            result
                .category_override
                .or_else(|| derive_error_category(result.status, redacted.as_ref()))
        } else {
            None
        };

        EventCompletion {
            status: result.status,
            ended_at: result.ended_at,
            error_category,
            output_json: redacted.as_ref().map(|v| self.redactor.render(v)),
        }
    }

    fn failed(error: &DomainError, operation: &str) -> RecordOutcome {
        tracing::warn!(operation, error = %error, "event recording failed; forwarding unaffected");
        RecordOutcome::Failed {
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteEventRepository, SqliteSequenceAllocator,
        SqliteSessionRepository,
    };
    use crate::services::redaction::REDACTION_MARKER;
    use async_trait::async_trait;
    use serde_json::json;

    async fn recorder() -> (EventRecorder, Arc<SqliteEventRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let events = Arc::new(SqliteEventRepository::new(pool.clone()));
        let recorder = EventRecorder::new(
            Arc::new(SqliteSessionRepository::new(pool.clone())),
            events.clone(),
            Arc::new(SqliteSequenceAllocator::new(pool)),
            Redactor::new(["token"], 256),
        );
        (recorder, events)
    }

    fn agent() -> AgentIdentity {
        AgentIdentity::new("main", "tester")
    }

    #[tokio::test]
    async fn test_record_success_event() {
        let (recorder, events) = recorder().await;
        let call = CallRecord::tool_call(
            "s1",
            agent(),
            Some("search".to_string()),
            Some("github".to_string()),
            Some(json!({"q": "rust", "token": "ghp_secret"})),
        );

        let outcome = recorder
            .record(call, CallResult::new(EventStatus::Success, Some(json!({"content": []}))))
            .await;
        let RecordOutcome::Recorded { event_id, sequence } = outcome else {
            panic!("expected Recorded, got {outcome:?}");
        };
        assert_eq!(sequence, 1);

        let event = events.get(event_id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Success);
        assert!(event.ended_at.is_some());
        assert_eq!(event.error_category, None);
        assert_eq!(event.upstream_key.as_deref(), Some("github"));
        let input = event.input_json.unwrap();
        assert!(!input.contains("ghp_secret"));
        assert!(input.contains(REDACTION_MARKER));
    }

    #[tokio::test]
    async fn test_record_derives_category_and_allows_override() {
        let (recorder, events) = recorder().await;
        let derived = recorder
            .record(
                CallRecord::tool_call("s1", agent(), None, None, None),
                CallResult::new(
                    EventStatus::Error,
                    Some(json!({"code": -32700, "message": "Parse error"})),
                ),
            )
            .await;
        let overridden = recorder
            .record(
                CallRecord::tool_call("s1", agent(), None, Some("C".to_string()), None),
                CallResult::new(EventStatus::Error, None)
                    .with_category(ErrorCategory::DownstreamUnreachable),
            )
            .await;

        let derived = events.get(derived.event_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(derived.error_category, Some(ErrorCategory::JsonrpcInvalid));
        let overridden = events.get(overridden.event_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(overridden.error_category, Some(ErrorCategory::DownstreamUnreachable));
        assert_eq!(overridden.sequence, 2);
    }

    #[tokio::test]
    async fn test_start_then_finish() {
        let (recorder, events) = recorder().await;
        let started = recorder
            .start(CallRecord::tool_call("s1", agent(), Some("slow".to_string()), None, None))
            .await;
        let event_id = started.event_id().unwrap();
        assert_eq!(
            events.get(event_id).await.unwrap().unwrap().status,
            EventStatus::Running
        );

        let finished = recorder
            .finish(event_id, CallResult::new(EventStatus::Timeout, None))
            .await;
        assert_eq!(finished, RecordOutcome::Updated { event_id });

        let event = events.get(event_id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Timeout);
        assert_eq!(event.error_category, Some(ErrorCategory::DownstreamTimeout));

        let again = recorder.finish(event_id, CallResult::new(EventStatus::Success, None)).await;
        assert!(again.is_failed());
    }

    #[tokio::test]
    async fn test_output_is_truncated_after_redaction() {
        let (recorder, events) = recorder().await;
        let output = json!({"token": "s".repeat(1000), "data": "d".repeat(1000)});
        let outcome = recorder
            .record(
                CallRecord::tool_call("s1", agent(), None, None, None),
                CallResult::new(EventStatus::Success, Some(output)),
            )
            .await;

        let event = events.get(outcome.event_id().unwrap()).await.unwrap().unwrap();
        let stored = event.output_json.unwrap();
        assert!(stored.len() <= 256);
        assert!(!stored.contains("sss"));
    }

    #[tokio::test]
    async fn test_disabled_recorder_records_nothing() {
        let (recorder, events) = recorder().await;
        let recorder = recorder.with_enabled(false);
        let outcome = recorder
            .record(
                CallRecord::tool_call("s1", agent(), None, None, None),
                CallResult::new(EventStatus::Success, None),
            )
            .await;
        assert_eq!(outcome, RecordOutcome::Disabled);
        assert!(events.list_by_session("s1").await.unwrap().is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl SequenceAllocator for BrokenStore {
        async fn next_sequence(&self, _session_id: &str) -> DomainResult<i64> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn current(&self, _session_id: &str) -> DomainResult<i64> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_drain_waits_for_detached_recordings() {
        let (recorder, events) = recorder().await;
        let recorder = Arc::new(recorder);
        let tasks = RecordingTasks::new();
        for i in 0..5 {
            let recorder = recorder.clone();
            tasks
                .spawn(async move {
                    let call = CallRecord::tool_call("s1", agent(), Some(format!("t{i}")), None, None);
                    recorder.record(call, CallResult::new(EventStatus::Success, None)).await;
                })
                .await;
        }
        tasks.drain().await;

        let sequences: Vec<i64> = events
            .list_by_session("s1")
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported_not_raised() {
        let pool = create_migrated_test_pool().await.unwrap();
        let recorder = EventRecorder::new(
            Arc::new(SqliteSessionRepository::new(pool.clone())),
            Arc::new(SqliteEventRepository::new(pool)),
            Arc::new(BrokenStore),
            Redactor::new(Vec::<String>::new(), 1024),
        );

        let outcome = recorder
            .record(
                CallRecord::tool_call("s1", agent(), None, None, None),
                CallResult::new(EventStatus::Success, None),
            )
            .await;
        assert!(matches!(outcome, RecordOutcome::Failed { reason } if reason.contains("locked")));
    }
}
