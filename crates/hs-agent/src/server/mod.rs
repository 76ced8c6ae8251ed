//! Control-plane HTTP and WebSocket listener
//!
//! Routes:
//! - `POST /api/session/start`, `POST /api/session/end`,
//!   `GET /api/session/status`, `GET /api/session/programs` for the coordinator
//! - `POST /offer` and `GET /ws?session_id=...` for the viewer

mod handlers;
mod signaling;
mod websocket;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::session::SessionOrchestrator;

/// Idle time after which a viewer WebSocket is dropped
pub const WS_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionOrchestrator,
    pub ws_idle_timeout: Duration,
}

impl AppState {
    pub fn new(sessions: SessionOrchestrator) -> Self {
        Self {
            sessions,
            ws_idle_timeout: WS_IDLE_TIMEOUT,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/session/start", post(handlers::start_session))
        .route("/api/session/end", post(handlers::end_session))
        .route("/api/session/status", get(handlers::session_status))
        .route("/api/session/programs", get(handlers::list_programs))
        .route("/offer", post(signaling::offer))
        .route("/ws", get(websocket::upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Control plane listening on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
