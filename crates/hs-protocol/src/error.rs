//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing or fragmenting media
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A NAL unit grew past the configured limit without a start code
    #[error("NAL unit too large: {size} bytes exceeds maximum of {max} bytes")]
    NalTooLarge { size: usize, max: usize },

    /// An empty NAL unit was handed to the packetizer
    #[error("Empty NAL unit")]
    EmptyNal,

    /// The MTU leaves no room for a fragmentation header
    #[error("MTU of {0} bytes is too small for FU-A fragmentation")]
    MtuTooSmall(usize),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
