//! Typed agent events
//!
//! Components publish onto one [`EventBus`]; the binary's event loop
//! matches on [`AgentEvent`] to drive status updates and state saves.

use chrono::{DateTime, Utc};
use hs_protocol::SessionId;
use tokio::sync::broadcast;

use crate::types::StatusSignal;

/// Events from the session orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session reached `Active`
    Started {
        session_id: SessionId,
        program_id: String,
    },
    /// A session was torn down
    Ended {
        session_id: SessionId,
        reason: String,
    },
    /// A start attempt failed and was rolled back
    FailedToStart {
        session_id: SessionId,
        reason: String,
    },
}

/// Events from the credential lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// The credential was replaced
    Refreshed {
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    },
    RefreshFailed { reason: String },
}

/// Events about the host's standing with the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Registered { host_id: String },
    StatusReported { signal: StatusSignal, delivered: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Session(SessionEvent),
    Auth(AuthEvent),
    Host(HostEvent),
}

impl From<SessionEvent> for AgentEvent {
    fn from(e: SessionEvent) -> Self {
        AgentEvent::Session(e)
    }
}

impl From<AuthEvent> for AgentEvent {
    fn from(e: AuthEvent) -> Self {
        AgentEvent::Auth(e)
    }
}

impl From<HostEvent> for AgentEvent {
    fn from(e: HostEvent) -> Self {
        AgentEvent::Host(e)
    }
}

/// Default number of buffered events per subscriber
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Broadcast fan-out of [`AgentEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: impl Into<AgentEvent>) {
        let event = event.into();
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(?event, "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_sees_published_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(HostEvent::Registered {
            host_id: "h1".into(),
        });
        bus.publish(SessionEvent::Started {
            session_id: SessionId::new("s1"),
            program_id: "p".into(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::Host(HostEvent::Registered { .. })
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::Session(SessionEvent::Started { .. })
        ));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::with_capacity(4);
        bus.publish(AuthEvent::RefreshFailed {
            reason: "offline".into(),
        });
    }
}
