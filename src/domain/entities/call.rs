//! Call entity, call lifecycle states, and repository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Lifecycle state of a one-to-one call.
///
/// Legal transitions:
/// `Initiated -> Ringing -> Accepted -> Ended`,
/// `Ringing -> Rejected`, `Ringing -> Timeout`.
/// The four right-hand states `Ended`, `Rejected`, `Timeout` (and any state
/// for which [`CallStatus::is_terminal`] returns true) accept no further
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Accepted,
    Rejected,
    Ended,
    Timeout,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::Accepted => "accepted",
            CallStatus::Rejected => "rejected",
            CallStatus::Ended => "ended",
            CallStatus::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "accepted" => Some(CallStatus::Accepted),
            "rejected" => Some(CallStatus::Rejected),
            "ended" => Some(CallStatus::Ended),
            "timeout" => Some(CallStatus::Timeout),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Ended | CallStatus::Rejected | CallStatus::Timeout
        )
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-to-one audio/video call record.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: String,
    pub caller_id: i64,
    pub callee_id: i64,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

impl Call {
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    /// The other party of the call relative to `user_id`.
    pub fn peer_of(&self, user_id: i64) -> i64 {
        if self.caller_id == user_id {
            self.callee_id
        } else {
            self.caller_id
        }
    }
}

/// Call persistence used by the signaling service and the timeout sweep.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn insert(&self, call: &Call) -> Result<(), AppError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Call>, AppError>;

    /// Persist the current state of an existing call.
    async fn update(&self, call: &Call) -> Result<(), AppError>;

    /// The non-terminal call a user participates in, if any.
    async fn find_active_by_user(&self, user_id: i64) -> Result<Option<Call>, AppError>;

    /// Calls still ringing whose ring started before `cutoff`.
    async fn find_ringing_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Call>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(CallStatus::Ended.is_terminal());
        assert!(CallStatus::Rejected.is_terminal());
        assert!(CallStatus::Timeout.is_terminal());
        assert!(!CallStatus::Initiated.is_terminal());
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(!CallStatus::Accepted.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::Accepted,
            CallStatus::Rejected,
            CallStatus::Ended,
            CallStatus::Timeout,
        ] {
            assert_eq!(CallStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_peer_of() {
        let call = Call {
            id: "c1".into(),
            caller_id: 1,
            callee_id: 2,
            status: CallStatus::Ringing,
            started_at: Utc::now(),
            accepted_at: None,
            ended_at: None,
            duration_seconds: None,
        };
        assert_eq!(call.peer_of(1), 2);
        assert_eq!(call.peer_of(2), 1);
        assert!(call.is_participant(1));
        assert!(!call.is_participant(3));
    }
}
