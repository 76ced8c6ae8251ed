//! hs-core: Core abstractions and configuration for the hoststream agent
//!
//! This crate provides the shared domain types, typed events, persisted
//! state, configuration structures, and the traits behind which the agent's
//! external collaborators (screen capture, program catalog, input injection)
//! sit.

pub mod config;
pub mod error;
pub mod events;
pub mod state;
pub mod traits;
pub mod types;

pub use error::{CaptureError, ConfigError, InjectError, LaunchError, StateError};
pub use events::{AgentEvent, AuthEvent, EventBus, HostEvent, SessionEvent};
pub use state::{HostIdentity, PersistedState, StateStore, StoredCredential};
pub use types::{Program, SessionStatus, StatusSignal};
