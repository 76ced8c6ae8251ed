//! Session orchestrator

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use hs_core::traits::{
    CaptureSource, ProgramCatalog, ProgramHandle, ProgramLauncher, VideoStream,
};
use hs_core::{EventBus, Program, SessionEvent, SessionStatus};
use hs_protocol::{InputCommand, SessionId, StartSessionRequest};

use super::{SessionError, SessionInfo};
use crate::input::InputDispatcher;
use crate::status::SessionActivity;
use crate::transport::{PumpExit, StreamTransport, TransportFactory};

/// Collaborators a [`SessionOrchestrator`] is built from
pub struct SessionParts {
    pub catalog: Arc<dyn ProgramCatalog>,
    pub launcher: Arc<dyn ProgramLauncher>,
    pub capture: Arc<dyn CaptureSource>,
    pub transports: Arc<dyn TransportFactory>,
    pub input: InputDispatcher,
    pub events: EventBus,
    /// Upper bound on launch + capture + transport + negotiation
    pub setup_timeout: Duration,
}

struct ActiveSession {
    info: SessionInfo,
    program: Box<dyn ProgramHandle>,
    transport: Arc<dyn StreamTransport>,
}

/// Everything a successful start attempt holds
struct Acquired {
    program: Box<dyn ProgramHandle>,
    transport: Arc<dyn StreamTransport>,
    stream: VideoStream,
    answer: Option<String>,
}

struct Inner {
    parts: SessionParts,
    active: Mutex<Option<ActiveSession>>,
    snapshot: watch::Sender<Option<Arc<SessionInfo>>>,
}

/// Owns the single active session
///
/// Start and end are serialized through one lock held for the whole of
/// setup or teardown. Readers use a snapshot that never waits on that lock.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(parts: SessionParts) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                parts,
                active: Mutex::new(None),
                snapshot,
            }),
        }
    }

    /// Start a session for `req`
    ///
    /// Returns the session and, when the request carried an offer, the
    /// negotiated answer SDP.
    pub async fn start_session(
        &self,
        req: StartSessionRequest,
    ) -> Result<(SessionInfo, Option<String>), SessionError> {
        let parts = &self.inner.parts;
        let mut slot = self.inner.active.lock().await;

        if let Some(active) = slot.as_ref() {
            tracing::info!(
                "Rejecting session {}: session {} is active",
                req.session_id,
                active.info.id
            );
            return Err(SessionError::AlreadyActive);
        }

        let program = parts
            .catalog
            .get(&req.program_id)
            .ok_or_else(|| SessionError::ProgramNotFound(req.program_id.clone()))?;

        let mut info = SessionInfo::from_request(&req, program.clone());
        info.transition(SessionStatus::Starting);
        tracing::info!(
            "Starting session {} ({}) for {}",
            info.id,
            program.name,
            info.client_name
        );

        let deadline = Instant::now() + parts.setup_timeout;
        let acquired = match self.acquire(&program, &req.webrtc_offer, deadline).await {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::error!("Session {} failed to start: {}", info.id, e);
                info.transition(SessionStatus::FailedToStart);
                parts.events.publish(SessionEvent::FailedToStart {
                    session_id: info.id.clone(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let pump = acquired
            .transport
            .start_stream(acquired.stream, parts.capture.frame_rate());
        self.watch_pump(info.id.clone(), pump);

        info.transition(SessionStatus::Active);
        *slot = Some(ActiveSession {
            info: info.clone(),
            program: acquired.program,
            transport: acquired.transport,
        });
        self.inner.snapshot.send_replace(Some(Arc::new(info.clone())));

        tracing::info!("Session {} active", info.id);
        parts.events.publish(SessionEvent::Started {
            session_id: info.id.clone(),
            program_id: info.program.id.clone(),
        });
        Ok((info, acquired.answer))
    }

    /// Launch, capture and connect before `deadline`
    ///
    /// On failure everything acquired so far is released before returning.
    async fn acquire(
        &self,
        program: &Program,
        offer: &str,
        deadline: Instant,
    ) -> Result<Acquired, SessionError> {
        let parts = &self.inner.parts;

        let mut handle = within(deadline, parts.setup_timeout, parts.launcher.launch(program))
            .await?
            .map_err(SessionError::LaunchFailed)?;

        match self.connect(offer, deadline).await {
            Ok((stream, transport, answer)) => Ok(Acquired {
                program: handle,
                transport,
                stream,
                answer,
            }),
            Err(e) => {
                if let Err(stop) = parts.capture.stop().await {
                    tracing::warn!("Rollback: failed to stop capture: {}", stop);
                }
                if let Err(kill) = handle.kill().await {
                    tracing::warn!("Rollback: failed to kill program {:?}: {}", handle.pid(), kill);
                }
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        offer: &str,
        deadline: Instant,
    ) -> Result<(VideoStream, Arc<dyn StreamTransport>, Option<String>), SessionError> {
        let parts = &self.inner.parts;
        let limit = parts.setup_timeout;

        let stream = within(deadline, limit, parts.capture.start())
            .await?
            .map_err(SessionError::CaptureFailed)?;

        let transport = within(deadline, limit, parts.transports.create(parts.input.clone()))
            .await?
            .map_err(SessionError::TransportFailed)?;

        if offer.trim().is_empty() {
            tracing::debug!("No offer with start command, viewer will negotiate");
            return Ok((stream, transport, None));
        }

        let negotiated = within(deadline, limit, transport.handle_offer(offer))
            .await
            .and_then(|answer| answer.map_err(SessionError::TransportFailed));
        match negotiated {
            Ok(answer) => Ok((stream, transport, Some(answer))),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    /// End the active session. A no-op returning `None` when idle.
    pub async fn end_session(&self) -> Option<SessionInfo> {
        self.end_matching(None, "ended by coordinator").await
    }

    /// End the session only if `id` is still the active one
    pub async fn end_if_current(&self, id: &SessionId, reason: &str) -> bool {
        self.end_matching(Some(id), reason).await.is_some()
    }

    async fn end_matching(&self, expected: Option<&SessionId>, reason: &str) -> Option<SessionInfo> {
        let mut slot = self.inner.active.lock().await;

        let current = slot.as_ref()?;
        if expected.is_some_and(|id| *id != current.info.id) {
            return None;
        }
        let mut active = slot.take()?;
        self.inner.snapshot.send_replace(None);

        tracing::info!("Ending session {}: {}", active.info.id, reason);

        if let Err(e) = active.program.kill().await {
            tracing::warn!(
                "Failed to kill program {:?} for session {}: {}",
                active.program.pid(),
                active.info.id,
                e
            );
        }
        if let Err(e) = self.inner.parts.capture.stop().await {
            tracing::warn!("Failed to stop capture: {}", e);
        }
        active.transport.close().await;

        active.info.transition(SessionStatus::Ended);
        active.info.end_reason = Some(reason.to_string());

        self.inner.parts.events.publish(SessionEvent::Ended {
            session_id: active.info.id.clone(),
            reason: reason.to_string(),
        });
        Some(active.info)
    }

    /// Current session snapshot
    pub fn current_session(&self) -> Option<Arc<SessionInfo>> {
        self.inner.snapshot.borrow().clone()
    }

    /// Subscribe to session snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<SessionInfo>>> {
        self.inner.snapshot.subscribe()
    }

    /// Whether `id` names the active session
    pub fn is_current(&self, id: &SessionId) -> bool {
        self.inner
            .snapshot
            .borrow()
            .as_ref()
            .is_some_and(|info| info.id == *id)
    }

    /// Forward a decoded input command to the dispatcher
    pub fn process_input(&self, cmd: &InputCommand) {
        self.inner.parts.input.handle_command(cmd);
    }

    /// Decode and forward a raw input record
    pub fn process_record(&self, record: &[u8]) -> bool {
        self.inner.parts.input.handle_record(record)
    }

    /// Renegotiate the active session's transport with a viewer offer
    pub async fn handle_offer(&self, sdp: &str) -> Result<String, SessionError> {
        let transport = {
            let slot = self.inner.active.lock().await;
            let active = slot.as_ref().ok_or(SessionError::NoActiveSession)?;
            Arc::clone(&active.transport)
        };
        transport
            .handle_offer(sdp)
            .await
            .map_err(SessionError::TransportFailed)
    }

    pub fn programs(&self) -> Vec<Program> {
        self.inner.parts.catalog.list()
    }

    fn watch_pump(&self, session_id: SessionId, pump: JoinHandle<PumpExit>) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let reason = match pump.await {
                Ok(PumpExit::SourceEnded) => "capture stream ended".to_string(),
                Ok(PumpExit::SourceError(e)) => format!("capture stream failed: {e}"),
                Ok(PumpExit::SinkError(e)) => format!("media write failed: {e}"),
                Ok(PumpExit::Closed) => "media transport closed".to_string(),
                Err(e) => format!("media pump aborted: {e}"),
            };
            tracing::debug!("Media pump for session {} exited: {}", session_id, reason);

            if orchestrator.end_if_current(&session_id, &reason).await {
                tracing::warn!("Session {} ended after media pump exit", session_id);
            }
        });
    }
}

async fn within<T>(
    deadline: Instant,
    limit: Duration,
    step: impl Future<Output = T>,
) -> Result<T, SessionError> {
    tokio::time::timeout_at(deadline, step)
        .await
        .map_err(|_| SessionError::SetupTimeout(limit))
}

impl SessionActivity for SessionOrchestrator {
    fn session_active(&self) -> bool {
        self.inner.snapshot.borrow().is_some()
    }
}
