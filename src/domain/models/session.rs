//! Recording sessions.
//!
//! A session groups the events observed by one recording context: a gateway
//! daemon run, or a stdio wrapper identified by the session id it reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is accepting events
    Active,
    /// Session ended normally
    Completed,
    /// Session ended because of a failure
    Error,
    /// Session was aborted
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" | "complete" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses are the only valid targets of `end`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// One recording context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique identifier
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl Session {
    /// Start a session with a freshly generated id.
    pub fn start() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Start a session under an id supplied by the caller (e.g. a stdio wrapper).
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::Error,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::from_str("canceled"), Some(SessionStatus::Cancelled));
        assert_eq!(SessionStatus::from_str("paused"), None);
    }

    #[test]
    fn test_new_session_is_active() {
        let session = Session::start();
        assert!(session.is_active());
        assert!(session.ended_at.is_none());
        assert!(!session.status.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
    }
}
