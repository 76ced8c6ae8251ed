//! Viewer input over WebSocket
//!
//! Binary frames are raw input records. Text frames carry the JSON form
//! `{"sessionId": ..., "command": [..10 bytes..]}`. The socket closes when
//! the session it was opened for ends or after an idle period.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use hs_protocol::{InputMessage, SessionId};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    session_id: Option<String>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    let Some(session_id) = params
        .session_id
        .filter(|id| !id.trim().is_empty())
        .map(SessionId::new)
    else {
        return (StatusCode::BAD_REQUEST, "session_id is required").into_response();
    };

    if !state.sessions.is_current(&session_id) {
        tracing::debug!("WebSocket for unknown session {}", session_id);
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, session_id: SessionId) {
    tracing::info!("Viewer input connected for session {}", session_id);

    let mut sessions = state.sessions.subscribe();
    let mut dispatched: u64 = 0;

    // the session may have ended between the upgrade and the subscription
    if !state.sessions.is_current(&session_id) {
        let _ = socket.close().await;
        return;
    }

    loop {
        let msg = tokio::select! {
            changed = sessions.changed() => {
                if changed.is_err() || !state.sessions.is_current(&session_id) {
                    tracing::info!("Session {} ended, closing input socket", session_id);
                    break;
                }
                continue;
            }
            next = tokio::time::timeout(state.ws_idle_timeout, socket.recv()) => match next {
                Err(_) => {
                    tracing::info!("Input socket for session {} idle, closing", session_id);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::debug!("Input socket error: {}", e);
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            },
        };

        match msg {
            Message::Binary(record) => {
                if state.sessions.process_record(&record) {
                    dispatched += 1;
                }
            }
            Message::Text(text) => match serde_json::from_str::<InputMessage>(&text) {
                Ok(input) if input.session_id != session_id => {
                    tracing::debug!("Skipping input for session {}", input.session_id);
                }
                Ok(input) if !input.is_well_formed() => {
                    tracing::debug!("Skipping short input record ({} bytes)", input.command.len());
                }
                Ok(input) => {
                    if state.sessions.process_record(&input.command) {
                        dispatched += 1;
                    }
                }
                Err(e) => tracing::debug!("Invalid input message: {}", e),
            },
            Message::Close(_) => break,
            // pings are answered by axum
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = socket.close().await;
    tracing::info!(
        "Viewer input disconnected for session {} ({} events)",
        session_id,
        dispatched
    );
}
