//! Error category derivation.
//!
//! A pure function of the call status and its already-redacted output. Only
//! the JSON-RPC `code` and `message` fields are ever inspected.

use serde_json::Value;

use crate::domain::models::{ErrorCategory, EventStatus};

const CONNECT_FAILURE_CODE: i64 = -32000;
const PARSE_ERROR_CODE: i64 = -32700;
const INVALID_REQUEST_CODE: i64 = -32600;

/// Category for a call that ended with `status`.
///
/// Decision order:
/// 1. success, running, cancelled: none
/// 2. timeout: `downstream_timeout`, whatever the output
/// 3. error without a JSON-RPC error object: `unknown`
/// 4. code -32000 with a message mentioning "connect": `downstream_unreachable`
/// 5. code -32700 or -32600: `jsonrpc_invalid`
/// 6. any other JSON-RPC error: `jsonrpc_error`
pub fn derive_error_category(status: EventStatus, redacted_output: Option<&Value>) -> Option<ErrorCategory> {
    match status {
        EventStatus::Success | EventStatus::Running | EventStatus::Cancelled => None,
        EventStatus::Timeout => Some(ErrorCategory::DownstreamTimeout),
        EventStatus::Error => Some(categorize_error_output(redacted_output)),
    }
}

fn categorize_error_output(output: Option<&Value>) -> ErrorCategory {
    let Some((code, message)) = output.and_then(jsonrpc_error_fields) else {
        return ErrorCategory::Unknown;
    };

    if code == CONNECT_FAILURE_CODE && message.to_lowercase().contains("connect") {
        ErrorCategory::DownstreamUnreachable
    } else if code == PARSE_ERROR_CODE || code == INVALID_REQUEST_CODE {
        ErrorCategory::JsonrpcInvalid
    } else {
        ErrorCategory::JsonrpcError
    }
}

/// Extract `(code, message)` from an error object, or from the `error`
/// member of a full JSON-RPC response.
fn jsonrpc_error_fields(output: &Value) -> Option<(i64, &str)> {
    let error = match output.get("error") {
        Some(inner @ Value::Object(_)) => inner,
        _ => output,
    };
    let code = error.get("code")?.as_i64()?;
    let message = error.get("message").and_then(Value::as_str).unwrap_or("");
    Some((code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_failure_statuses_have_no_category() {
        let output = json!({"code": -32000, "message": "Connect failed"});
        for status in [EventStatus::Success, EventStatus::Running, EventStatus::Cancelled] {
            assert_eq!(derive_error_category(status, Some(&output)), None);
        }
    }

    #[test]
    fn test_timeout_ignores_output() {
        assert_eq!(
            derive_error_category(EventStatus::Timeout, None),
            Some(ErrorCategory::DownstreamTimeout)
        );
        assert_eq!(
            derive_error_category(EventStatus::Timeout, Some(&json!({"code": -32700, "message": "x"}))),
            Some(ErrorCategory::DownstreamTimeout)
        );
    }

    #[test]
    fn test_connect_failure_is_unreachable() {
        let output = json!({"code": -32000, "message": "Connect failed: connection refused"});
        assert_eq!(
            derive_error_category(EventStatus::Error, Some(&output)),
            Some(ErrorCategory::DownstreamUnreachable)
        );
        let upper = json!({"code": -32000, "message": "CONNECTION RESET"});
        assert_eq!(
            derive_error_category(EventStatus::Error, Some(&upper)),
            Some(ErrorCategory::DownstreamUnreachable)
        );
    }

    #[test]
    fn test_minus_32000_without_connect_is_generic() {
        let output = json!({"code": -32000, "message": "Server busy"});
        assert_eq!(
            derive_error_category(EventStatus::Error, Some(&output)),
            Some(ErrorCategory::JsonrpcError)
        );
    }

    #[test]
    fn test_invalid_codes() {
        for code in [-32700, -32600] {
            let output = json!({"code": code, "message": "bad"});
            assert_eq!(
                derive_error_category(EventStatus::Error, Some(&output)),
                Some(ErrorCategory::JsonrpcInvalid)
            );
        }
    }

    #[test]
    fn test_full_response_envelope_is_understood() {
        let output = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "Method not found"}});
        assert_eq!(
            derive_error_category(EventStatus::Error, Some(&output)),
            Some(ErrorCategory::JsonrpcError)
        );
    }

    #[test]
    fn test_unshaped_error_output_is_unknown() {
        assert_eq!(derive_error_category(EventStatus::Error, None), Some(ErrorCategory::Unknown));
        assert_eq!(
            derive_error_category(EventStatus::Error, Some(&json!("boom"))),
            Some(ErrorCategory::Unknown)
        );
        assert_eq!(
            derive_error_category(EventStatus::Error, Some(&json!({"code": "E1", "message": "x"}))),
            Some(ErrorCategory::Unknown)
        );
        assert_eq!(
            derive_error_category(EventStatus::Error, Some(&json!({"isError": true, "content": []}))),
            Some(ErrorCategory::Unknown)
        );
    }
}
