use chrono::{DateTime, Utc};
use serde::Serialize;

use hs_core::{Program, SessionStatus};
use hs_protocol::{SessionId, StartSessionRequest};

/// Snapshot of a session's metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub program: Program,
    pub client_id: String,
    pub client_name: String,
    pub host_id: String,
    pub host_name: String,
    /// Bearer the viewer presents on the media and control channels
    #[serde(skip_serializing)]
    pub session_token: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
}

impl SessionInfo {
    /// New session in `Created` for a start command
    pub fn from_request(req: &StartSessionRequest, program: Program) -> Self {
        Self {
            id: req.session_id.clone(),
            program,
            client_id: req.client_id.clone(),
            client_name: req.client_name.clone(),
            host_id: req.host_id.clone(),
            host_name: req.host_name.clone(),
            session_token: req.session_token.clone(),
            status: SessionStatus::Created,
            created_at: req.created_at.unwrap_or_else(Utc::now),
            started_at: req.started_at,
            ended_at: None,
            end_reason: None,
        }
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                "Session {}: illegal transition {} -> {}",
                self.id,
                self.status,
                next
            );
            return false;
        }

        match next {
            SessionStatus::Active => {
                self.started_at.get_or_insert_with(Utc::now);
            }
            SessionStatus::Ended | SessionStatus::FailedToStart => {
                self.ended_at = Some(Utc::now());
            }
            SessionStatus::Created | SessionStatus::Starting => {}
        }
        self.status = next;
        true
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}
