//! Ingress for stdio telemetry.
//!
//! Each POSTed record describes one line seen by a `wrap` proxy. A
//! `tools/call` request line opens a running event; the response line with
//! the same id in the same session finalizes it. Everything else only keeps
//! the session alive. Malformed payloads are dropped after logging.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::event_recorder::{AgentIdentity, CallRecord, CallResult, EventRecorder, RecordOutcome};
use super::telemetry::Direction;
use crate::domain::models::EventStatus;

/// Calls unanswered for this long are closed as timed out.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
    session_id: String,
    request_id: String,
}

#[derive(Debug, Clone, Copy)]
struct PendingCall {
    event_id: Uuid,
    opened: Instant,
}

/// What the ingestor did with one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A running event was opened.
    Started(RecordOutcome),
    /// A pending event was finalized.
    Finished(RecordOutcome),
    /// Valid record with nothing to record.
    Observed,
    /// Payload unusable; the reason was logged.
    Discarded(&'static str),
}

/// The subset of a telemetry payload the ingestor relies on. Missing or
/// mistyped optional fields are treated as absent.
#[derive(Debug, Clone, PartialEq)]
struct ParsedTelemetry {
    direction: Direction,
    raw: Option<Value>,
    method: Option<String>,
    id: Option<Value>,
    is_error: Option<bool>,
    session_id: Option<String>,
    upstream_key: Option<String>,
}

fn parse_payload(payload: &Value) -> Result<ParsedTelemetry, &'static str> {
    let object = payload.as_object().ok_or("payload is not an object")?;
    let direction = object
        .get("direction")
        .and_then(Value::as_str)
        .and_then(Direction::from_str)
        .ok_or("missing or unknown direction")?;

    let raw = object
        .get("raw")
        .and_then(Value::as_str)
        .and_then(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object);

    let string_field = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let method = string_field("method").or_else(|| {
        raw.as_ref()
            .and_then(|r| r.get("method"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let id = object
        .get("id")
        .filter(|v| !v.is_null())
        .cloned()
        .or_else(|| raw.as_ref().and_then(|r| r.get("id")).filter(|v| !v.is_null()).cloned());

    Ok(ParsedTelemetry {
        direction,
        method,
        id,
        is_error: object.get("isError").and_then(Value::as_bool),
        session_id: string_field("sessionId"),
        upstream_key: string_field("upstreamKey"),
        raw,
    })
}

pub struct TelemetryIngestor {
    recorder: Arc<EventRecorder>,
    default_session: String,
    agent: AgentIdentity,
    pending: Mutex<HashMap<PendingKey, PendingCall>>,
    pending_ttl: Duration,
}

impl TelemetryIngestor {
    pub fn new(recorder: Arc<EventRecorder>, default_session: impl Into<String>, agent: AgentIdentity) -> Self {
        Self {
            recorder,
            default_session: default_session.into(),
            agent,
            pending: Mutex::new(HashMap::new()),
            pending_ttl: DEFAULT_PENDING_TTL,
        }
    }

    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub async fn ingest(&self, payload: &Value) -> IngestOutcome {
        self.prune_expired().await;

        let record = match parse_payload(payload) {
            Ok(record) => record,
            Err(reason) => {
                tracing::debug!(reason, "telemetry payload discarded");
                return IngestOutcome::Discarded(reason);
            }
        };

        let session_id = record
            .session_id
            .clone()
            .unwrap_or_else(|| self.default_session.clone());
        self.recorder.ensure_session(&session_id).await;

        match record.direction {
            Direction::Request => self.on_request(session_id, record).await,
            Direction::Response => self.on_response(session_id, record).await,
        }
    }

    async fn on_request(&self, session_id: String, record: ParsedTelemetry) -> IngestOutcome {
        if record.method.as_deref() != Some("tools/call") {
            return IngestOutcome::Observed;
        }
        let Some(request_id) = record.id.as_ref().map(id_key) else {
            // A notification never gets a response to pair with.
            return IngestOutcome::Observed;
        };

        let params = record.raw.as_ref().and_then(|r| r.get("params"));
        let tool_name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let arguments = params.and_then(|p| p.get("arguments")).cloned();

        let call = CallRecord::tool_call(
            session_id.clone(),
            self.agent.clone(),
            tool_name,
            record.upstream_key,
            arguments,
        );
        let outcome = self.recorder.start(call).await;

        if let Some(event_id) = outcome.event_id() {
            let key = PendingKey { session_id, request_id };
            if let Ok(mut pending) = self.pending.lock() {
                pending.insert(key, PendingCall { event_id, opened: Instant::now() });
            }
        }
        IngestOutcome::Started(outcome)
    }

    async fn on_response(&self, session_id: String, record: ParsedTelemetry) -> IngestOutcome {
        let Some(request_id) = record.id.as_ref().map(id_key) else {
            return IngestOutcome::Observed;
        };
        let key = PendingKey { session_id, request_id };
        let Some(call) = self.pending.lock().ok().and_then(|mut p| p.remove(&key)) else {
            return IngestOutcome::Observed;
        };

        let result = response_result(record.raw, record.is_error);
        IngestOutcome::Finished(self.recorder.finish(call.event_id, result).await)
    }

    /// Close every call still waiting for a response as cancelled.
    ///
    /// Used at shutdown, once no further payloads can arrive. Returns the
    /// number of calls closed.
    pub async fn cancel_pending(&self) -> usize {
        let abandoned: Vec<(PendingKey, PendingCall)> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => return 0,
        };

        for (key, call) in &abandoned {
            tracing::info!(
                session_id = %key.session_id,
                event_id = %call.event_id,
                "pending stdio call cancelled at shutdown"
            );
            let _ = self
                .recorder
                .finish(call.event_id, CallResult::new(EventStatus::Cancelled, None))
                .await;
        }
        abandoned.len()
    }

    /// Close pending calls older than the TTL as timed out.
    async fn prune_expired(&self) {
        let expired: Vec<PendingCall> = match self.pending.lock() {
            Ok(mut pending) => {
                let ttl = self.pending_ttl;
                let mut expired = Vec::new();
                pending.retain(|_, call| {
                    let keep = call.opened.elapsed() < ttl;
                    if !keep {
                        expired.push(*call);
                    }
                    keep
                });
                expired
            }
            Err(_) => return,
        };

        for call in expired {
            tracing::info!(event_id = %call.event_id, "pending stdio call expired without a response");
            let _ = self
                .recorder
                .finish(call.event_id, CallResult::new(EventStatus::Timeout, None))
                .await;
        }
    }
}

/// Stable map key for a JSON-RPC id; `1` and `"1"` stay distinct.
fn id_key(id: &Value) -> String {
    id.to_string()
}

fn response_result(raw: Option<Value>, is_error: Option<bool>) -> CallResult {
    let Some(mut response) = raw else {
        let status = if is_error == Some(true) { EventStatus::Error } else { EventStatus::Success };
        return CallResult::new(status, None);
    };

    if let Some(error) = response.get_mut("error").map(Value::take) {
        return CallResult::new(EventStatus::Error, Some(error));
    }
    let result = response.get_mut("result").map(Value::take);
    let tool_failed = result
        .as_ref()
        .and_then(|r| r.get("isError"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let status = if tool_failed || is_error == Some(true) { EventStatus::Error } else { EventStatus::Success };
    CallResult::new(status, result)
}

/// Ordered, non-blocking queue in front of a [`TelemetryIngestor`].
///
/// Payloads are processed one at a time in arrival order so a response is
/// never handled before its request.
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<Value>,
    worker: JoinHandle<()>,
}

impl IngestQueue {
    pub fn start(ingestor: Arc<TelemetryIngestor>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let worker = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                ingestor.ingest(&payload).await;
            }
        });
        Self { tx, worker }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Value> {
        self.tx.clone()
    }

    /// Process everything queued so far, then stop. Other senders must
    /// already be dropped.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "telemetry ingest worker failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteEventRepository, SqliteSequenceAllocator, SqliteSessionRepository,
    };
    use crate::domain::models::ErrorCategory;
    use crate::domain::ports::{EventRepository, SessionRepository};
    use crate::services::redaction::Redactor;
    use serde_json::json;

    async fn ingestor() -> (TelemetryIngestor, Arc<SqliteEventRepository>, Arc<SqliteSessionRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let events = Arc::new(SqliteEventRepository::new(pool.clone()));
        let sessions = Arc::new(SqliteSessionRepository::new(pool.clone()));
        let recorder = EventRecorder::new(
            sessions.clone(),
            events.clone(),
            Arc::new(SqliteSequenceAllocator::new(pool)),
            Redactor::new(["api_key"], 4096),
        );
        let ingestor = TelemetryIngestor::new(Arc::new(recorder), "daemon", AgentIdentity::new("main", "stdio"));
        (ingestor, events, sessions)
    }

    fn line(direction: &str, raw: &Value, session: &str) -> Value {
        json!({
            "timestamp": "2026-01-01T00:00:00Z",
            "direction": direction,
            "raw": raw.to_string(),
            "sessionId": session,
            "upstreamKey": "fs",
        })
    }

    #[tokio::test]
    async fn test_request_then_response_finalizes_event() {
        let (ingestor, events, sessions) = ingestor().await;

        let request = json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call",
                             "params": {"name": "read_file", "arguments": {"path": "/tmp/x", "api_key": "k"}}});
        let started = ingestor.ingest(&line("request", &request, "wrap-1")).await;
        let IngestOutcome::Started(RecordOutcome::Recorded { event_id, sequence }) = started else {
            panic!("expected a started event, got {started:?}");
        };
        assert_eq!(sequence, 1);
        assert_eq!(ingestor.pending_count(), 1);
        assert!(sessions.get("wrap-1").await.unwrap().is_some());

        let running = events.get(event_id).await.unwrap().unwrap();
        assert_eq!(running.status, EventStatus::Running);
        assert_eq!(running.tool_name.as_deref(), Some("read_file"));
        assert_eq!(running.upstream_key.as_deref(), Some("fs"));
        assert!(!running.input_json.unwrap().contains("\"k\""));

        let response = json!({"jsonrpc": "2.0", "id": 7, "result": {"content": [{"type": "text", "text": "hi"}]}});
        let finished = ingestor.ingest(&line("response", &response, "wrap-1")).await;
        assert_eq!(finished, IngestOutcome::Finished(RecordOutcome::Updated { event_id }));
        assert_eq!(ingestor.pending_count(), 0);

        let event = events.get(event_id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Success);
        assert!(event.ended_at.is_some());
        assert_eq!(event.error_category, None);
    }

    #[tokio::test]
    async fn test_error_response_is_categorized() {
        let (ingestor, events, _) = ingestor().await;
        let request = json!({"jsonrpc": "2.0", "id": "r1", "method": "tools/call", "params": {"name": "x"}});
        let started = ingestor.ingest(&line("request", &request, "wrap-1")).await;
        let IngestOutcome::Started(outcome) = started else { panic!("not started") };

        let response = json!({"jsonrpc": "2.0", "id": "r1", "error": {"code": -32602, "message": "bad"}});
        ingestor.ingest(&line("response", &response, "wrap-1")).await;

        let event = events.get(outcome.event_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Error);
        assert_eq!(event.error_category, Some(ErrorCategory::JsonrpcError));
    }

    #[tokio::test]
    async fn test_ids_are_scoped_to_sessions() {
        let (ingestor, _, _) = ingestor().await;
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "x"}});
        ingestor.ingest(&line("request", &request, "a")).await;

        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        assert_eq!(ingestor.ingest(&line("response", &response, "b")).await, IngestOutcome::Observed);
        let string_id = json!({"jsonrpc": "2.0", "id": "1", "result": {}});
        assert_eq!(ingestor.ingest(&line("response", &string_id, "a")).await, IngestOutcome::Observed);
        assert_eq!(ingestor.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_tolerated() {
        let (ingestor, events, sessions) = ingestor().await;

        assert!(matches!(ingestor.ingest(&json!([1, 2])).await, IngestOutcome::Discarded(_)));
        assert!(matches!(
            ingestor.ingest(&json!({"direction": "sideways", "raw": "{}"})).await,
            IngestOutcome::Discarded(_)
        ));

        // Unparseable raw and no session id: kept as an observation on the default session.
        let outcome = ingestor
            .ingest(&json!({"direction": "response", "raw": "not json", "id": null}))
            .await;
        assert_eq!(outcome, IngestOutcome::Observed);
        assert!(sessions.get("daemon").await.unwrap().is_some());
        assert!(events.list_by_session("daemon").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_pending_calls_time_out() {
        let (ingestor, events, _) = ingestor().await;
        let ingestor = ingestor.with_pending_ttl(Duration::ZERO);

        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "slow"}});
        let IngestOutcome::Started(outcome) = ingestor.ingest(&line("request", &request, "w")).await else {
            panic!("not started");
        };
        ingestor.ingest(&line("request", &json!({"jsonrpc": "2.0", "method": "notifications/x"}), "w")).await;

        let event = events.get(outcome.event_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Timeout);
        assert_eq!(event.error_category, Some(ErrorCategory::DownstreamTimeout));
    }

    #[tokio::test]
    async fn test_cancel_pending_closes_unanswered_calls() {
        let (ingestor, events, _) = ingestor().await;

        let answered = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "fast"}});
        let unanswered = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "slow"}});
        ingestor.ingest(&line("request", &answered, "wrap-3")).await;
        ingestor.ingest(&line("request", &unanswered, "wrap-3")).await;
        ingestor
            .ingest(&line("response", &json!({"jsonrpc": "2.0", "id": 1, "result": {}}), "wrap-3"))
            .await;

        assert_eq!(ingestor.cancel_pending().await, 1);
        assert_eq!(ingestor.pending_count(), 0);
        assert_eq!(ingestor.cancel_pending().await, 0);

        let recorded = events.list_by_session("wrap-3").await.unwrap();
        assert_eq!(recorded[0].status, EventStatus::Success);
        assert_eq!(recorded[1].tool_name.as_deref(), Some("slow"));
        assert_eq!(recorded[1].status, EventStatus::Cancelled);
        assert!(recorded[1].ended_at.is_some());
        assert_eq!(recorded[1].error_category, None);
    }

    #[tokio::test]
    async fn test_queue_processes_in_order() {
        let (ingestor, events, _) = ingestor().await;
        let queue = IngestQueue::start(Arc::new(ingestor));
        let tx = queue.sender();

        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "x"}});
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        tx.send(line("request", &request, "q")).unwrap();
        tx.send(line("response", &response, "q")).unwrap();
        drop(tx);
        queue.close().await;

        let recorded = events.list_by_session("q").await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].status, EventStatus::Success);
    }
}
