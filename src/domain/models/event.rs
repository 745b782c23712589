//! Recorded events.
//!
//! An event is the metadata of one observed call. Payloads are stored only in
//! their redacted and truncated form; prompts and model reasoning never reach
//! this type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of call an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentCall,
    SubagentCall,
    SkillCall,
    ToolCall,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentCall => "agent_call",
            Self::SubagentCall => "subagent_call",
            Self::SkillCall => "skill_call",
            Self::ToolCall => "tool_call",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "agent_call" => Some(Self::AgentCall),
            "subagent_call" => Some(Self::SubagentCall),
            "skill_call" => Some(Self::SkillCall),
            "tool_call" => Some(Self::ToolCall),
            _ => None,
        }
    }
}

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Success,
    Error,
    Timeout,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Statuses that must carry an error category.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}

/// Stable, closed set of failure categories. Never raw error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    DownstreamTimeout,
    DownstreamUnreachable,
    JsonrpcInvalid,
    JsonrpcError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DownstreamTimeout => "downstream_timeout",
            Self::DownstreamUnreachable => "downstream_unreachable",
            Self::JsonrpcInvalid => "jsonrpc_invalid",
            Self::JsonrpcError => "jsonrpc_error",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "downstream_timeout" => Some(Self::DownstreamTimeout),
            "downstream_unreachable" => Some(Self::DownstreamUnreachable),
            "jsonrpc_invalid" => Some(Self::JsonrpcInvalid),
            "jsonrpc_error" => Some(Self::JsonrpcError),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: String,
    /// Parent in the call tree, if any
    pub parent_event_id: Option<Uuid>,
    /// Unique and contiguous within the session
    pub sequence: i64,
    pub event_type: EventType,
    pub agent_role: String,
    pub agent_name: String,
    pub tool_name: Option<String>,
    pub mcp_method: Option<String>,
    /// Provider id for hub-routed or correlated stdio calls; `None` in legacy mode
    pub upstream_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub error_category: Option<ErrorCategory>,
    /// Redacted, truncated serialized input
    pub input_json: Option<String>,
    /// Redacted, truncated serialized output
    pub output_json: Option<String>,
}

/// Terminal update applied to an event that was inserted as `running`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCompletion {
    pub status: EventStatus,
    pub ended_at: DateTime<Utc>,
    pub error_category: Option<ErrorCategory>,
    pub output_json: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_status_helpers() {
        assert!(!EventStatus::Running.is_terminal());
        assert!(EventStatus::Cancelled.is_terminal());
        assert!(EventStatus::Error.is_failure());
        assert!(EventStatus::Timeout.is_failure());
        assert!(!EventStatus::Success.is_failure());
        assert!(!EventStatus::Cancelled.is_failure());
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::DownstreamUnreachable).unwrap();
        assert_eq!(json, "\"downstream_unreachable\"");
        assert_eq!(
            ErrorCategory::from_str("jsonrpc_invalid"),
            Some(ErrorCategory::JsonrpcInvalid)
        );
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::ToolCall.as_str(), "tool_call");
        assert_eq!(EventType::from_str("skill_call"), Some(EventType::SkillCall));
        assert_eq!(EventType::from_str("tool"), None);
    }
}
