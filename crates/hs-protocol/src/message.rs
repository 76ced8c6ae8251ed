//! JSON messages exchanged with the coordinator and the viewer
//!
//! # Message Flow
//!
//! 1. Coordinator sends `StartSessionRequest` to `/api/session/start`,
//!    agent replies with `StartSessionResponse` carrying the SDP answer
//! 2. Viewer may renegotiate through `/offer` with an `SdpMessage`
//! 3. Viewer sends `InputMessage`s (or raw records) over the WebSocket
//! 4. Coordinator queries `/api/session/status` (`SessionStatusResponse`)
//!    and ends the session through `/api/session/end`
//!
//! Outbound, the agent refreshes its credential with `RefreshTokenRequest`
//! and registers itself with `RegisterHostRequest`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::input::RECORD_SIZE;
use crate::session::SessionId;

/// Session-start command sent by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    #[serde(rename = "id", alias = "session_id")]
    pub session_id: SessionId,
    #[serde(default)]
    pub session_token: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    pub program_id: String,
    /// SDP offer from the viewer; empty when the viewer negotiates later
    #[serde(default)]
    pub webrtc_offer: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// Reply to a session-start command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webrtc_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartSessionResponse {
    /// Successful start, with the answer when an offer was negotiated
    pub fn started(answer: Option<String>) -> Self {
        Self {
            success: true,
            webrtc_answer: answer,
            error: None,
        }
    }

    /// Failed start
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            webrtc_answer: None,
            error: Some(error.into()),
        }
    }
}

/// Coarse session presence reported to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    Active,
    Idle,
}

/// Body of `/api/session/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub status: SessionState,
}

/// Viewer signaling body, used for both offer and answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpMessage {
    pub sdp: String,
}

/// JSON-wrapped input record sent over the WebSocket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMessage {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    /// The raw record as a byte array
    pub command: Vec<u8>,
}

impl InputMessage {
    /// Whether the wrapped record has the expected size
    pub fn is_well_formed(&self) -> bool {
        self.command.len() >= RECORD_SIZE
    }
}

/// Credential refresh request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Credential refresh response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Present when the coordinator rotates refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Host registration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterHostRequest {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
}

/// Host record as the coordinator returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "ipAddress", alias = "ip_address")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_from_coordinator_json() {
        let json = r#"{
            "id": "sess-1",
            "session_token": "tok",
            "client_id": "c1",
            "client_name": "Laptop",
            "program_id": "p9",
            "webrtc_offer": "v=0",
            "status": "PENDING",
            "created_at": "2024-05-01T10:00:00Z",
            "host_id": "h1",
            "host_name": "Desk",
            "started_at": "2024-05-01T10:00:05Z"
        }"#;
        let req: StartSessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.session_id, SessionId::new("sess-1"));
        assert_eq!(req.program_id, "p9");
        assert!(req.started_at.is_some());
    }

    #[test]
    fn test_start_request_accepts_session_id_alias() {
        let json = r#"{"session_id": "s2", "program_id": "p"}"#;
        let req: StartSessionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.session_id.as_str(), "s2");
        assert!(req.webrtc_offer.is_empty());
    }

    #[test]
    fn test_failed_response_omits_answer() {
        let json = serde_json::to_string(&StartSessionResponse::failed("busy")).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"busy"}"#);
    }

    #[test]
    fn test_status_is_uppercase() {
        let body = SessionStatusResponse {
            status: SessionState::Idle,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"status":"IDLE"}"#);
    }

    #[test]
    fn test_input_message_shape() {
        let msg: InputMessage =
            serde_json::from_str(r#"{"sessionId":"s","command":[0,0,0,0,30,0,0,0,0,0]}"#).unwrap();
        assert!(msg.is_well_formed());
        assert_eq!(msg.command[4], 0x1E);
    }

    #[test]
    fn test_refresh_response_parses_rfc3339() {
        let json = r#"{"access_token":"a","expires_at":"2030-01-01T00:00:00Z"}"#;
        let resp: RefreshTokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token, "a");
        assert!(resp.refresh_token.is_none());
    }
}
