pub mod error_category;
pub mod event_recorder;
pub mod gateway;
pub mod http_forwarder;
pub mod hub_router;
pub mod protocol;
pub mod redaction;
pub mod stdio_proxy;
pub mod telemetry;
pub mod telemetry_ingest;

pub use error_category::derive_error_category;
pub use event_recorder::{AgentIdentity, CallRecord, CallResult, EventRecorder, RecordOutcome, RecordingTasks};
pub use gateway::{Gateway, GatewayTarget};
pub use http_forwarder::{ForwardOutcome, ForwardTarget, GatewayReply, HttpForwarder};
pub use hub_router::{resolve_tool, split_namespaced, HubRouter, ToolRoute};
pub use protocol::{validate_request, JsonRpcError, ValidatedRequest};
pub use redaction::Redactor;
pub use stdio_proxy::{ProxyError, ProxyState, StdioProxy};
pub use telemetry::{Direction, FileSink, HttpSink, TelemetryDispatcher, TelemetryRecord, TelemetrySink, TelemetryTags};
pub use telemetry_ingest::{IngestOutcome, IngestQueue, TelemetryIngestor};
