//! H.264 RTP payload packetization (RFC 6184)
//!
//! NAL units that fit the MTU are sent as single NAL unit packets. Larger
//! units are split into FU-A fragments: a one-byte FU indicator (NRI of the
//! original header, type 28) and a one-byte FU header (start/end bits plus
//! the original type) followed by a slice of the original payload.
//!
//! The packetizer also owns the RTP timestamp. It advances by a fixed
//! `clock_rate / fps` step whenever a new picture starts, which assumes the
//! capture source emits frames at a constant rate.
//!
//! The marker bit goes on the last packet of an access unit. Whether a slice
//! is the last one is only known once the next NAL unit arrives, so the most
//! recent slice is held back until then (or until [`H264Packetizer::flush`]).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// RTP clock rate for H.264 video
pub const H264_CLOCK_RATE: u32 = 90_000;

/// Default payload budget per packet, below a 1500-byte path MTU
pub const DEFAULT_MTU: usize = 1200;

/// FU indicator + FU header
const FU_A_HEADER_SIZE: usize = 2;

const NAL_TYPE_MASK: u8 = 0x1F;
const NAL_NRI_MASK: u8 = 0x60;
const NAL_TYPE_FU_A: u8 = 28;
const NAL_TYPE_SEI: u8 = 6;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_AUD: u8 = 9;
const NAL_TYPE_FILLER: u8 = 12;

const FU_START_BIT: u8 = 0x80;
const FU_END_BIT: u8 = 0x40;

/// NAL unit type from the first header byte
pub fn nal_unit_type(header: u8) -> u8 {
    header & NAL_TYPE_MASK
}

/// Whether a NAL unit type carries coded slice data
pub fn is_vcl(nal_type: u8) -> bool {
    (1..=5).contains(&nal_type)
}

/// Whether a slice NAL begins a new picture (`first_mb_in_slice == 0`)
///
/// `first_mb_in_slice` is the first Exp-Golomb field of the slice header,
/// and the value zero is coded as a single `1` bit.
fn starts_picture(nal: &[u8]) -> bool {
    nal.get(1).is_some_and(|b| b & 0x80 != 0)
}

/// Whether a NAL unit opens a new access unit
fn starts_access_unit(nal_type: u8, nal: &[u8]) -> bool {
    match nal_type {
        NAL_TYPE_AUD | NAL_TYPE_SEI | NAL_TYPE_SPS | NAL_TYPE_PPS => true,
        t if is_vcl(t) => starts_picture(nal),
        _ => false,
    }
}

fn mark_last(payloads: &mut [RtpPayload]) {
    if let Some(last) = payloads.last_mut() {
        last.marker = true;
    }
}

/// Split one NAL unit into RTP payloads no larger than `mtu`
pub fn fragment_nal(nal: &[u8], mtu: usize) -> Result<Vec<Bytes>, ProtocolError> {
    if nal.is_empty() {
        return Err(ProtocolError::EmptyNal);
    }

    if nal.len() <= mtu {
        return Ok(vec![Bytes::copy_from_slice(nal)]);
    }

    if mtu <= FU_A_HEADER_SIZE {
        return Err(ProtocolError::MtuTooSmall(mtu));
    }

    let header = nal[0];
    let fu_indicator = (header & NAL_NRI_MASK) | NAL_TYPE_FU_A;
    let nal_type = nal_unit_type(header);

    let body = &nal[1..];
    let chunk_size = mtu - FU_A_HEADER_SIZE;
    let count = body.len().div_ceil(chunk_size);

    let payloads = body
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| {
            let mut fu_header = nal_type;
            if i == 0 {
                fu_header |= FU_START_BIT;
            }
            if i + 1 == count {
                fu_header |= FU_END_BIT;
            }

            let mut buf = BytesMut::with_capacity(FU_A_HEADER_SIZE + chunk.len());
            buf.put_u8(fu_indicator);
            buf.put_u8(fu_header);
            buf.extend_from_slice(chunk);
            buf.freeze()
        })
        .collect();

    Ok(payloads)
}

/// One RTP payload with the header fields the packetizer decides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPayload {
    pub payload: Bytes,
    pub marker: bool,
    pub timestamp: u32,
}

/// Turns a sequence of NAL units into timestamped RTP payloads
#[derive(Debug)]
pub struct H264Packetizer {
    mtu: usize,
    timestamp_step: u32,
    timestamp: u32,
    seen_picture: bool,
    /// Packets of the latest slice, not yet known to end its access unit
    held: Vec<RtpPayload>,
}

impl H264Packetizer {
    /// Create a packetizer for a source running at `fps` frames per second
    pub fn new(mtu: usize, fps: u32) -> Self {
        Self {
            mtu,
            timestamp_step: H264_CLOCK_RATE / fps.max(1),
            timestamp: 0,
            seen_picture: false,
            held: Vec::new(),
        }
    }

    /// Per-picture timestamp increment
    pub fn timestamp_step(&self) -> u32 {
        self.timestamp_step
    }

    /// Packetize a single NAL unit
    ///
    /// Returns the packets that are ready to send: the held slice from the
    /// previous call (marked when `nal` starts a new access unit), followed
    /// by `nal` itself unless it is a slice, which is held in turn.
    /// Access unit delimiters and filler data are dropped. Parameter sets
    /// and SEI share the timestamp of the picture that follows them.
    pub fn packetize(&mut self, nal: &[u8]) -> Result<Vec<RtpPayload>, ProtocolError> {
        let Some(&header) = nal.first() else {
            return Err(ProtocolError::EmptyNal);
        };

        let nal_type = nal_unit_type(header);
        if nal_type == NAL_TYPE_FILLER {
            return Ok(Vec::new());
        }

        let fragments = if nal_type == NAL_TYPE_AUD {
            Vec::new()
        } else {
            fragment_nal(nal, self.mtu)?
        };

        let mut ready = std::mem::take(&mut self.held);
        if starts_access_unit(nal_type, nal) {
            mark_last(&mut ready);
        }

        let vcl = is_vcl(nal_type);
        if vcl && starts_picture(nal) {
            if self.seen_picture {
                self.timestamp = self.timestamp.wrapping_add(self.timestamp_step);
            }
            self.seen_picture = true;
        }

        let timestamp = self.timestamp;
        let packets = fragments.into_iter().map(|payload| RtpPayload {
            payload,
            marker: false,
            timestamp,
        });

        if vcl {
            self.held = packets.collect();
        } else {
            ready.extend(packets);
        }
        Ok(ready)
    }

    /// Release the held slice as the end of its access unit
    pub fn flush(&mut self) -> Vec<RtpPayload> {
        let mut ready = std::mem::take(&mut self.held);
        mark_last(&mut ready);
        ready
    }
}
