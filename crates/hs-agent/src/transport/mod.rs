//! Real-time media transport
//!
//! One peer connection per session carrying a single outbound H.264 track.
//! Signaling is a one-shot offer/answer exchange: the answer is returned only
//! after candidate gathering has finished, so no trickle channel is needed.

mod gate;
mod pump;
mod peer;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use hs_core::traits::VideoStream;

use crate::input::InputDispatcher;

pub use gate::ReadinessGate;
pub use pump::{run_pump, PumpContext, PumpExit, RtpSink};
pub use peer::{WebRtcTransport, WebRtcTransportFactory, INPUT_CHANNEL};

/// Media transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport initialization failed: {0}")]
    InitFailed(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("RTP write failed: {0}")]
    Write(String),

    #[error("Transport closed")]
    Closed,
}

/// A negotiated (or negotiable) media session with one viewer
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Apply a remote offer and return the final answer SDP
    async fn handle_offer(&self, sdp: &str) -> Result<String, TransportError>;

    /// Start draining `stream` into the video track
    ///
    /// Packets are only written once signaling has completed.
    fn start_stream(&self, stream: VideoStream, fps: u32) -> JoinHandle<PumpExit>;

    /// Close the peer connection. A no-op when already closed.
    async fn close(&self);

    fn is_ready(&self) -> bool;
}

/// Builds one transport per session
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        input: InputDispatcher,
    ) -> Result<Arc<dyn StreamTransport>, TransportError>;
}
