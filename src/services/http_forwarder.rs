//! Forwarding of one JSON-RPC call to one HTTP(S) downstream.
//!
//! Used directly in legacy (single upstream) mode and as the per-provider
//! transport of the hub. A parseable downstream reply goes back to the
//! client with its original status and bytes; transport failures become
//! gateway-local JSON-RPC errors with generic messages.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use super::event_recorder::CallResult;
use super::protocol::{JsonRpcError, UPSTREAM_ERROR, UPSTREAM_TIMEOUT};
use crate::domain::models::EventStatus;

const APPLICATION_JSON: &str = "application/json";

/// Request headers that describe the client connection rather than the call.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "host",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
    "content-type",
    "accept",
    // The reply body is relayed verbatim, so it must arrive unencoded.
    "accept-encoding",
];

/// HTTP status and body returned to the gateway's client.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl GatewayReply {
    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self {
            status,
            body: Bytes::from(serde_json::to_vec(value).unwrap_or_default()),
        }
    }

    pub fn error(status: StatusCode, error: JsonRpcError, id: Value) -> Self {
        Self::json(status, &error.into_response(id))
    }

    /// Acknowledgement for a notification: no JSON-RPC response exists.
    pub fn accepted() -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            body: Bytes::new(),
        }
    }

    /// Body decoded as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Where to send a call.
#[derive(Debug, Clone, Copy)]
pub struct ForwardTarget<'a> {
    pub url: &'a str,
    /// Configured headers; they take precedence over client headers
    pub headers: &'a BTreeMap<String, String>,
}

/// What happened to a forwarded call.
#[derive(Debug, Clone)]
pub enum ForwardOutcome {
    /// The downstream answered. `parsed` is `None` for an empty body.
    Reply {
        status: StatusCode,
        body: Bytes,
        parsed: Option<Value>,
    },
    Timeout,
    Unreachable,
    /// The downstream answered with something that is not JSON.
    InvalidReply { status: StatusCode },
}

impl ForwardOutcome {
    /// Client-visible reply plus the recording view of the same outcome.
    pub fn settle(self, id: Value) -> (GatewayReply, CallResult) {
        match self {
            Self::Reply { status, body, parsed } => {
                let result = classify_reply(status, parsed);
                (GatewayReply { status, body }, result)
            }
            Self::Timeout => {
                let error = JsonRpcError::new(UPSTREAM_TIMEOUT, "Upstream request timed out");
                let output = error.to_value();
                (
                    GatewayReply::error(StatusCode::GATEWAY_TIMEOUT, error, id),
                    CallResult::new(EventStatus::Timeout, Some(output)),
                )
            }
            Self::Unreachable => {
                let error = JsonRpcError::new(UPSTREAM_ERROR, "Connect failed: upstream unreachable");
                let output = error.to_value();
                (
                    GatewayReply::error(StatusCode::BAD_GATEWAY, error, id),
                    CallResult::new(EventStatus::Error, Some(output)),
                )
            }
            Self::InvalidReply { status } => {
                let error = JsonRpcError::new(
                    UPSTREAM_ERROR,
                    format!("Upstream returned a non-JSON response (HTTP {})", status.as_u16()),
                );
                let output = error.to_value();
                (
                    GatewayReply::error(StatusCode::BAD_GATEWAY, error, id),
                    CallResult::new(EventStatus::Error, Some(output)),
                )
            }
        }
    }
}

/// Recording status and output of a downstream reply. The reply itself is
/// never altered.
fn classify_reply(status: StatusCode, parsed: Option<Value>) -> CallResult {
    let Some(mut value) = parsed else {
        let call_status = if status.is_success() { EventStatus::Success } else { EventStatus::Error };
        return CallResult::new(call_status, None);
    };

    if let Some(error) = value.get_mut("error").map(Value::take) {
        return CallResult::new(EventStatus::Error, Some(error));
    }

    let tool_failed = value
        .get("result")
        .and_then(|r| r.get("isError"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    match value.get_mut("result").map(Value::take) {
        Some(result) if status.is_success() && !tool_failed => {
            CallResult::new(EventStatus::Success, Some(result))
        }
        Some(result) => CallResult::new(EventStatus::Error, Some(result)),
        None if status.is_success() => CallResult::new(EventStatus::Success, Some(value)),
        None => CallResult::new(EventStatus::Error, Some(value)),
    }
}

/// Client headers with connection-level headers removed and fixed JSON
/// content negotiation, overlaid with the target's configured headers.
pub fn build_outgoing_headers(incoming: &HeaderMap, configured: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len() + configured.len() + 2);

    for (name, value) in incoming {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || lower.starts_with("proxy-") {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));

    for (name, value) in configured {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid configured header"),
        }
    }

    headers
}

#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward under the default deadline.
    pub async fn forward(&self, target: ForwardTarget<'_>, incoming: &HeaderMap, body: &Value) -> ForwardOutcome {
        self.forward_within(target, incoming, body, self.timeout).await
    }

    /// Forward under an explicit deadline. Expiry cancels only this call.
    pub async fn forward_within(
        &self,
        target: ForwardTarget<'_>,
        incoming: &HeaderMap,
        body: &Value,
        deadline: Duration,
    ) -> ForwardOutcome {
        let request = self
            .client
            .post(target.url)
            .headers(build_outgoing_headers(incoming, target.headers))
            .json(body);

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        };

        match tokio::time::timeout(deadline, exchange).await {
            Err(_) => {
                tracing::warn!(url = %target.url, timeout_ms = deadline.as_millis() as u64, "upstream call timed out");
                ForwardOutcome::Timeout
            }
            Ok(Err(e)) if e.is_timeout() => ForwardOutcome::Timeout,
            Ok(Err(e)) => {
                // reqwest errors can embed OS error text; log only the class.
                tracing::warn!(url = %target.url, connect = e.is_connect(), "upstream call failed");
                ForwardOutcome::Unreachable
            }
            Ok(Ok((status, body))) => {
                if body.is_empty() {
                    return ForwardOutcome::Reply { status, body, parsed: None };
                }
                match serde_json::from_slice::<Value>(&body) {
                    Ok(parsed) => ForwardOutcome::Reply {
                        status,
                        body,
                        parsed: Some(parsed),
                    },
                    Err(_) => {
                        tracing::warn!(url = %target.url, status = status.as_u16(), "upstream reply is not JSON");
                        ForwardOutcome::InvalidReply { status }
                    }
                }
            }
        }
    }
}
