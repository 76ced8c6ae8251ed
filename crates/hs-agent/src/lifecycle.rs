//! Reactions to agent events
//!
//! Session start and end drive status updates; credential refreshes are
//! written through to the state file.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use hs_core::{
    AgentEvent, AuthEvent, HostEvent, PersistedState, SessionEvent, StateStore, StatusSignal,
    StoredCredential,
};

use crate::status::StatusReporter;

pub struct Lifecycle {
    reporter: Arc<StatusReporter>,
    store: StateStore,
    state: PersistedState,
}

impl Lifecycle {
    pub fn new(reporter: Arc<StatusReporter>, store: StateStore, state: PersistedState) -> Self {
        Self {
            reporter,
            store,
            state,
        }
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn handle(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Session(SessionEvent::Started { session_id, .. }) => {
                tracing::debug!("Session {} started, reporting in use", session_id);
                self.reporter.update_status(StatusSignal::InUse);
            }
            AgentEvent::Session(SessionEvent::Ended { session_id, .. }) => {
                tracing::debug!("Session {} ended, reporting available", session_id);
                self.reporter.update_status(StatusSignal::Available);
            }
            AgentEvent::Session(SessionEvent::FailedToStart { session_id, reason }) => {
                tracing::debug!("Session {} failed to start: {}", session_id, reason);
            }
            AgentEvent::Auth(AuthEvent::Refreshed {
                access_token,
                refresh_token,
                expires_at,
            }) => {
                self.state.credential = Some(StoredCredential {
                    access_token,
                    refresh_token,
                    access_token_expires_at: expires_at,
                });
                self.save();
            }
            AgentEvent::Auth(AuthEvent::RefreshFailed { reason }) => {
                tracing::warn!("Credential refresh failed: {}", reason);
            }
            AgentEvent::Host(HostEvent::Registered { host_id }) => {
                tracing::debug!("Host registered as {}", host_id);
            }
            AgentEvent::Host(HostEvent::StatusReported { signal, delivered }) => {
                tracing::trace!(%signal, delivered, "Status report");
            }
        }
    }

    fn save(&self) {
        match self.store.save(&self.state) {
            Ok(()) => tracing::debug!("Saved state to {}", self.store.path().display()),
            Err(e) => tracing::error!("Failed to save state: {}", e),
        }
    }

    /// Handle events until `cancel` fires. Returns the final state.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<AgentEvent>,
        cancel: CancellationToken,
    ) -> PersistedState {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.handle(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event loop lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use hs_core::{EventBus, HostIdentity};
    use hs_protocol::SessionId;

    use crate::auth::ClientError;
    use crate::status::{SessionActivity, StatusPublisher};

    struct Nowhere;

    #[async_trait]
    impl StatusPublisher for Nowhere {
        async fn publish(&self, _signal: StatusSignal) -> Result<(), ClientError> {
            Ok(())
        }
    }

    struct Idle;

    impl SessionActivity for Idle {
        fn session_active(&self) -> bool {
            false
        }
    }

    fn reporter() -> Arc<StatusReporter> {
        Arc::new(StatusReporter::new(
            Arc::new(Nowhere),
            Arc::new(Idle),
            Duration::from_secs(120),
            &CancellationToken::new(),
            EventBus::new(),
        ))
    }

    #[test]
    fn test_session_events_queue_status() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = reporter();
        let mut lifecycle = Lifecycle::new(
            reporter.clone(),
            StateStore::new(dir.path().join("state.toml")),
            PersistedState::default(),
        );

        lifecycle.handle(AgentEvent::Session(SessionEvent::Started {
            session_id: SessionId::new("s1"),
            program_id: "p".into(),
        }));
        lifecycle.handle(AgentEvent::Session(SessionEvent::Ended {
            session_id: SessionId::new("s1"),
            reason: "done".into(),
        }));
        lifecycle.handle(AgentEvent::Session(SessionEvent::FailedToStart {
            session_id: SessionId::new("s2"),
            reason: "no program".into(),
        }));
        assert_eq!(reporter.pending(), 2);
    }

    #[test]
    fn test_refresh_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.toml"));
        let host = HostIdentity {
            id: "host-1".into(),
            name: "den".into(),
            ip: "10.0.0.2".into(),
            port: 8080,
        };
        let mut lifecycle = Lifecycle::new(
            reporter(),
            store.clone(),
            PersistedState {
                credential: None,
                host: Some(host.clone()),
            },
        );

        let expires_at = Utc::now();
        lifecycle.handle(AgentEvent::Auth(AuthEvent::Refreshed {
            access_token: "new-access".into(),
            refresh_token: "rotated".into(),
            expires_at,
        }));

        let saved = store.load().unwrap();
        assert_eq!(saved.refresh_token(), Some("rotated"));
        assert_eq!(saved.host, Some(host));
        assert_eq!(lifecycle.state().credential, saved.credential);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let lifecycle = Lifecycle::new(
            reporter(),
            StateStore::new(dir.path().join("state.toml")),
            PersistedState::default(),
        );

        let task = tokio::spawn(lifecycle.run(bus.subscribe(), cancel.clone()));
        bus.publish(AuthEvent::Refreshed {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now(),
        });

        // wait for the save before cancelling
        let path = dir.path().join("state.toml");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        let state = task.await.unwrap();
        assert_eq!(state.refresh_token(), Some("r"));
    }
}
