//! Gateway request handling for both HTTP modes.
//!
//! Every request is validated first. Hub mode routes by tool namespace;
//! legacy mode forwards everything to one upstream. `tools/call` is the only
//! method that produces an event, and recording happens after the reply is
//! settled, off the response path.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::event_recorder::{AgentIdentity, CallRecord, CallResult, EventRecorder, RecordingTasks};
use super::http_forwarder::{ForwardTarget, GatewayReply};
use super::hub_router::{resolve_tool, tools_list_result, HubRouter, ToolRoute};
use super::protocol::{
    request_id_of, success_response, validate_request, JsonRpcError, ValidatedRequest, INVALID_PARAMS, METHOD_NOT_FOUND,
    PARSE_ERROR, UPSTREAM_ERROR,
};
use crate::domain::models::{ErrorCategory, EventStatus};
use crate::domain::ports::ProviderRegistrySource;

const TOOLS_CALL: &str = "tools/call";
const TOOLS_LIST: &str = "tools/list";
const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Where requests go.
pub enum GatewayTarget {
    Hub {
        registry: Arc<dyn ProviderRegistrySource>,
    },
    Legacy {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl GatewayTarget {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hub { .. } => "hub",
            Self::Legacy { .. } => "legacy",
        }
    }
}

pub struct Gateway {
    target: GatewayTarget,
    router: HubRouter,
    recorder: Arc<EventRecorder>,
    tasks: Arc<RecordingTasks>,
    session_id: String,
    agent: AgentIdentity,
}

impl Gateway {
    pub fn new(
        target: GatewayTarget,
        router: HubRouter,
        recorder: Arc<EventRecorder>,
        session_id: impl Into<String>,
        agent: AgentIdentity,
    ) -> Self {
        Self {
            target,
            router,
            recorder,
            tasks: Arc::new(RecordingTasks::new()),
            session_id: session_id.into(),
            agent,
        }
    }

    /// Share a task set with other recording producers.
    pub fn with_tasks(mut self, tasks: Arc<RecordingTasks>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn target(&self) -> &GatewayTarget {
        &self.target
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.recorder
    }

    pub fn tasks(&self) -> &Arc<RecordingTasks> {
        &self.tasks
    }

    /// Handle one POSTed body.
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> GatewayReply {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => {
                let error = JsonRpcError::new(PARSE_ERROR, "Parse error: body is not valid JSON");
                return GatewayReply::error(StatusCode::BAD_REQUEST, error, Value::Null);
            }
        };

        let request = match validate_request(&value) {
            Ok(request) => request,
            Err(error) => {
                tracing::debug!(code = error.code, "rejected invalid JSON-RPC request");
                return GatewayReply::error(StatusCode::BAD_REQUEST, error, request_id_of(&value));
            }
        };

        tracing::debug!(method = request.method, mode = self.target.name(), "handling request");
        match &self.target {
            GatewayTarget::Hub { registry } => self.handle_hub(registry.as_ref(), headers, &value, request).await,
            GatewayTarget::Legacy { url, headers: configured } => {
                let target = ForwardTarget { url, headers: configured };
                self.handle_legacy(target, headers, &value, request).await
            }
        }
    }

    async fn handle_legacy(
        &self,
        target: ForwardTarget<'_>,
        headers: &HeaderMap,
        value: &Value,
        request: ValidatedRequest<'_>,
    ) -> GatewayReply {
        // Captured before forwarding so a failed call is still attributable.
        let call = (request.method == TOOLS_CALL).then(|| {
            CallRecord::tool_call(
                self.session_id.clone(),
                self.agent.clone(),
                request.tool_name().map(str::to_string),
                None,
                request.tool_arguments().cloned(),
            )
        });

        let outcome = self.router.forwarder().forward(target, headers, value).await;
        let (reply, result) = outcome.settle(request.id());
        if let Some(call) = call {
            self.record(call, result).await;
        }
        reply
    }

    async fn handle_hub(
        &self,
        registry: &dyn ProviderRegistrySource,
        headers: &HeaderMap,
        value: &Value,
        request: ValidatedRequest<'_>,
    ) -> GatewayReply {
        // Only notifications the hub answers itself are acknowledged locally.
        if request.is_notification() && request.method != TOOLS_CALL {
            return GatewayReply::accepted();
        }

        match request.method {
            "initialize" => GatewayReply::json(StatusCode::OK, &success_response(request.id(), initialize_result(&request))),
            "ping" => GatewayReply::json(StatusCode::OK, &success_response(request.id(), json!({}))),
            TOOLS_LIST => {
                let registry = match registry.load().await {
                    Ok(registry) => registry,
                    Err(e) => return registry_unavailable(&e, request.id()),
                };
                let tools = self.router.list_tools(&registry, headers).await;
                tracing::debug!(tools = tools.len(), "hub tools/list aggregated");
                GatewayReply::json(StatusCode::OK, &success_response(request.id(), tools_list_result(tools)))
            }
            TOOLS_CALL => {
                let Some(name) = request.tool_name() else {
                    let error = JsonRpcError::new(INVALID_PARAMS, "Invalid params: tools/call requires params.name");
                    return GatewayReply::error(StatusCode::BAD_REQUEST, error, request.id());
                };
                let registry = match registry.load().await {
                    Ok(registry) => registry,
                    Err(e) => return registry_unavailable(&e, request.id()),
                };
                let route = resolve_tool(&registry, name);
                self.call_routed(route, headers, value, request).await
            }
            other => {
                let error = JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {other}"));
                GatewayReply::error(StatusCode::NOT_FOUND, error, request.id())
            }
        }
    }

    async fn call_routed(
        &self,
        route: ToolRoute,
        headers: &HeaderMap,
        value: &Value,
        request: ValidatedRequest<'_>,
    ) -> GatewayReply {
        let call = CallRecord::tool_call(
            self.session_id.clone(),
            self.agent.clone(),
            Some(route.tool().to_string()),
            route.upstream_key().map(str::to_string),
            request.tool_arguments().cloned(),
        );

        let (reply, result) = match &route {
            ToolRoute::Http { provider, tool } => {
                let outcome = self.router.call_tool(provider, tool, headers, value).await;
                outcome.settle(request.id())
            }
            ToolRoute::UnknownProvider { prefix, .. } => {
                let label = prefix.as_deref().unwrap_or("<none>");
                tracing::warn!(provider = label, "tools/call for unknown provider");
                local_failure(
                    StatusCode::NOT_FOUND,
                    JsonRpcError::new(UPSTREAM_ERROR, format!("Unknown provider: {label}")),
                    request.id(),
                )
            }
            ToolRoute::Unsupported { provider_id, .. } => {
                tracing::warn!(provider = %provider_id, "tools/call for a stdio provider");
                local_failure(
                    StatusCode::BAD_GATEWAY,
                    JsonRpcError::new(
                        UPSTREAM_ERROR,
                        format!("Provider '{provider_id}' uses the stdio transport and cannot be reached by the hub"),
                    ),
                    request.id(),
                )
            }
        };

        self.record(call, result).await;
        reply
    }

    async fn record(&self, call: CallRecord, result: CallResult) {
        let recorder = Arc::clone(&self.recorder);
        self.tasks
            .spawn(async move {
                // A failed outcome was logged by the recorder; nothing else to do.
                let _ = recorder.record(call, result).await;
            })
            .await;
    }
}

/// Reply and recording for a call the hub refused before any downstream I/O.
fn local_failure(status: StatusCode, error: JsonRpcError, id: Value) -> (GatewayReply, CallResult) {
    let output = error.to_value();
    let result =
        CallResult::new(EventStatus::Error, Some(output)).with_category(ErrorCategory::DownstreamUnreachable);
    (GatewayReply::error(status, error, id), result)
}

fn registry_unavailable(error: &dyn std::fmt::Display, id: Value) -> GatewayReply {
    tracing::error!(error = %error, "provider registry could not be loaded");
    GatewayReply::error(
        StatusCode::SERVICE_UNAVAILABLE,
        JsonRpcError::new(UPSTREAM_ERROR, "Provider registry unavailable"),
        id,
    )
}

fn initialize_result(request: &ValidatedRequest<'_>) -> Value {
    let protocol_version = request
        .params()
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}
