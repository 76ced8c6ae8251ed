//! hs-protocol: Wire formats for the hoststream agent
//!
//! This crate defines the byte-level and JSON formats the agent speaks:
//! the fixed-size remote input record, Annex-B H.264 framing and RTP
//! fragmentation, and the control-plane messages exchanged with the
//! coordinator and the viewer.

pub mod error;
pub mod h264;
pub mod input;
pub mod keymap;
pub mod message;
pub mod nal;
pub mod session;

pub use error::ProtocolError;
pub use h264::{H264Packetizer, RtpPayload, DEFAULT_MTU, H264_CLOCK_RATE};
pub use input::{
    decode_input, InputAction, InputCategory, InputCommand, InputKind, InputRecord, MouseButton,
    RECORD_SIZE,
};
pub use message::{
    HostRecord, InputMessage, RefreshTokenRequest, RefreshTokenResponse, RegisterHostRequest,
    SdpMessage, SessionState, SessionStatusResponse, StartSessionRequest, StartSessionResponse,
};
pub use nal::NalCodec;
pub use session::SessionId;
