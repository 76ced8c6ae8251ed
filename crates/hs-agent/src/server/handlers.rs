use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use hs_core::Program;
use hs_protocol::{SessionState, SessionStatusResponse, StartSessionRequest, StartSessionResponse};

use super::AppState;

/// Failures are reported in the body with a 200, as the coordinator expects
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Json<StartSessionResponse> {
    tracing::info!(
        "Start request for session {} (program {}) from {}",
        req.session_id,
        req.program_id,
        req.client_name
    );

    match state.sessions.start_session(req).await {
        Ok((_, answer)) => Json(StartSessionResponse::started(answer)),
        Err(e) => {
            if e.is_precondition() {
                tracing::info!("Start rejected: {}", e);
            }
            Json(StartSessionResponse::failed(e.to_string()))
        }
    }
}

pub async fn end_session(State(state): State<AppState>) -> StatusCode {
    if state.sessions.end_session().await.is_none() {
        tracing::debug!("End requested with no active session");
    }
    StatusCode::NO_CONTENT
}

pub async fn session_status(State(state): State<AppState>) -> Json<SessionStatusResponse> {
    let status = if state.sessions.current_session().is_some() {
        SessionState::Active
    } else {
        SessionState::Idle
    };
    Json(SessionStatusResponse { status })
}

pub async fn list_programs(State(state): State<AppState>) -> Json<Vec<Program>> {
    Json(state.sessions.programs())
}
