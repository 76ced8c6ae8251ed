//! hs-agent: Host streaming agent
//!
//! The agent runs on a machine that exposes local programs for remote use.
//! On a start command from the coordinator it launches the program, captures
//! the screen as H.264, streams it to the viewer over WebRTC, and injects the
//! viewer's input back into the host. It keeps its credential fresh and
//! reports availability on a heartbeat.

pub mod auth;
pub mod capture;
pub mod host;
pub mod input;
pub mod lifecycle;
pub mod programs;
pub mod server;
pub mod session;
pub mod status;
pub mod transport;

pub use auth::{AccessCredential, AuthClient, ClientError, TokenRefresher};
pub use lifecycle::Lifecycle;
pub use session::{SessionError, SessionInfo, SessionOrchestrator, SessionParts};
pub use status::StatusReporter;
