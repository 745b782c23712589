//! JSON-RPC 2.0 envelope helpers and the request validator.
//!
//! Validation runs before any routing, forwarding or header handling. A
//! request that fails here is never forwarded and never recorded.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Gateway-local transport failure (connect, unknown provider, bad reply)
pub const UPSTREAM_ERROR: i64 = -32000;
/// Gateway-local deadline expiry
pub const UPSTREAM_TIMEOUT: i64 = -32001;

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Full error response for the given request id.
    pub fn into_response(self, id: Value) -> Value {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": self,
        })
    }
}

/// Successful response envelope.
pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// A request that passed validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedRequest<'a> {
    pub body: &'a Map<String, Value>,
    pub method: &'a str,
}

impl<'a> ValidatedRequest<'a> {
    /// Request id, `null` when absent.
    pub fn id(&self) -> Value {
        self.body.get("id").cloned().unwrap_or(Value::Null)
    }

    /// Requests without an `id` member are notifications.
    pub fn is_notification(&self) -> bool {
        !self.body.contains_key("id")
    }

    pub fn params(&self) -> Option<&'a Value> {
        self.body.get("params")
    }

    /// `params.name` of a `tools/call`.
    pub fn tool_name(&self) -> Option<&'a str> {
        self.params()?.get("name")?.as_str()
    }

    /// `params.arguments` of a `tools/call`.
    pub fn tool_arguments(&self) -> Option<&'a Value> {
        self.params()?.get("arguments")
    }
}

/// Check the minimal JSON-RPC 2.0 request shape.
pub fn validate_request(body: &Value) -> Result<ValidatedRequest<'_>, JsonRpcError> {
    let Value::Object(map) = body else {
        return Err(JsonRpcError::new(
            INVALID_REQUEST,
            "Invalid Request: body must be a JSON object",
        ));
    };

    if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::new(
            INVALID_REQUEST,
            "Invalid Request: jsonrpc must be \"2.0\"",
        ));
    }

    match map.get("method").and_then(Value::as_str) {
        Some(method) if !method.is_empty() => Ok(ValidatedRequest { body: map, method }),
        _ => Err(JsonRpcError::new(
            INVALID_REQUEST,
            "Invalid Request: method must be a non-empty string",
        )),
    }
}

/// Id to echo in an error for a body that failed validation.
pub fn request_id_of(body: &Value) -> Value {
    body.get("id").cloned().unwrap_or(Value::Null)
}

/// Best-effort metadata of one protocol line, used by telemetry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMetadata {
    pub method: Option<String>,
    pub id: Option<Value>,
    pub is_error: Option<bool>,
}

/// Parse a single line as JSON-RPC. `None` if it is not a JSON object.
pub fn inspect_message(line: &[u8]) -> Option<MessageMetadata> {
    let value: Value = serde_json::from_slice(line).ok()?;
    let map = value.as_object()?;

    let is_response = map.contains_key("result") || map.contains_key("error");
    let is_error = is_response.then(|| {
        map.contains_key("error")
            || map
                .get("result")
                .and_then(|r| r.get("isError"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    });

    Some(MessageMetadata {
        method: map.get("method").and_then(Value::as_str).map(str::to_string),
        id: map.get("id").cloned(),
        is_error,
    })
}
