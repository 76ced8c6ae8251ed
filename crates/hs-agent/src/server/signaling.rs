use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use hs_protocol::SdpMessage;

use super::AppState;
use crate::session::SessionError;

/// Viewer renegotiation against the active session's transport
pub async fn offer(State(state): State<AppState>, Json(msg): Json<SdpMessage>) -> Response {
    match state.sessions.handle_offer(&msg.sdp).await {
        Ok(sdp) => Json(SdpMessage { sdp }).into_response(),
        Err(SessionError::NoActiveSession) => {
            (StatusCode::CONFLICT, "no active session").into_response()
        }
        Err(e) => {
            tracing::warn!("Offer failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed").into_response()
        }
    }
}
