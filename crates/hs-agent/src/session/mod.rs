//! Session lifecycle
//!
//! The orchestrator owns the single active session: program process,
//! capture, and media transport. Every mutation goes through one lock.

mod model;
mod orchestrator;

use std::time::Duration;

use thiserror::Error;

use hs_core::{CaptureError, LaunchError};

use crate::transport::TransportError;

pub use model::SessionInfo;
pub use orchestrator::{SessionOrchestrator, SessionParts};

/// Session start/end errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Host already has an active session")]
    AlreadyActive,

    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    #[error("Failed to launch program: {0}")]
    LaunchFailed(#[source] LaunchError),

    #[error("Failed to start capture: {0}")]
    CaptureFailed(#[source] CaptureError),

    #[error("Failed to set up media transport: {0}")]
    TransportFailed(#[source] TransportError),

    #[error("Session setup did not finish within {0:?}")]
    SetupTimeout(Duration),

    #[error("No active session")]
    NoActiveSession,
}

impl SessionError {
    /// Precondition failures are the caller's fault and are not logged as errors
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SessionError::AlreadyActive
                | SessionError::ProgramNotFound(_)
                | SessionError::NoActiveSession
        )
    }
}
