//! Screen capture

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::CaptureError;

/// Annex-B H.264 elementary stream produced by a capture source
pub type VideoStream = Box<dyn AsyncRead + Send + Unpin>;

/// Produces an encoded video byte stream on demand
///
/// A source runs at most one capture at a time. The stream ends (EOF) once
/// [`stop`](CaptureSource::stop) has been called or the encoder exits.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Start capturing and return the encoded stream
    async fn start(&self) -> Result<VideoStream, CaptureError>;

    /// Stop the running capture. No-op when nothing is running.
    async fn stop(&self) -> Result<(), CaptureError>;

    /// Frames per second the stream is encoded at
    fn frame_rate(&self) -> u32;
}
