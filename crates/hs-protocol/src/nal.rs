//! Tokio codec splitting an Annex-B H.264 byte stream into NAL units
//!
//! Units are delimited by `00 00 01` start codes; the four-byte form
//! `00 00 00 01` is handled by trimming trailing zero bytes from the unit
//! that precedes it. Emitted units carry no start code.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::ProtocolError;

/// Three-byte start code prefix
const START_CODE: [u8; 3] = [0, 0, 1];

/// Default upper bound on a single NAL unit (4MB)
pub const DEFAULT_MAX_NAL_SIZE: usize = 4 * 1024 * 1024;

/// Decoder yielding one NAL unit per item
#[derive(Debug)]
pub struct NalCodec {
    /// Largest unit accepted before the stream is considered corrupt
    max_nal_size: usize,
    /// Whether the first start code has been seen
    synced: bool,
    /// Offset to resume the start-code search from
    scan_from: usize,
}

impl Default for NalCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl NalCodec {
    /// Create a new codec with the default size limit
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_NAL_SIZE)
    }

    /// Create a new codec with a custom size limit
    pub fn with_max_size(max_nal_size: usize) -> Self {
        Self {
            max_nal_size,
            synced: false,
            scan_from: 0,
        }
    }
}

fn find_start_code(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < from + START_CODE.len() {
        return None;
    }
    buf[from..]
        .windows(START_CODE.len())
        .position(|w| w == START_CODE)
        .map(|p| p + from)
}

fn trim_trailing_zeros(mut nal: BytesMut) -> Bytes {
    let end = nal.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    nal.truncate(end);
    nal.freeze()
}

impl Decoder for NalCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if !self.synced {
                match find_start_code(src, 0) {
                    Some(pos) => {
                        if pos > 0 {
                            tracing::trace!("Skipped {} bytes before first start code", pos);
                        }
                        src.advance(pos + START_CODE.len());
                        self.synced = true;
                        self.scan_from = 0;
                    }
                    None => {
                        // Keep a possible partial start code at the tail
                        let keep = START_CODE.len() - 1;
                        if src.len() > keep {
                            let drop = src.len() - keep;
                            src.advance(drop);
                        }
                        return Ok(None);
                    }
                }
            }

            match find_start_code(src, self.scan_from) {
                Some(pos) => {
                    let unit = src.split_to(pos);
                    src.advance(START_CODE.len());
                    self.scan_from = 0;

                    let nal = trim_trailing_zeros(unit);
                    if nal.is_empty() {
                        // Back-to-back start codes
                        continue;
                    }
                    return Ok(Some(nal));
                }
                None => {
                    if src.len() > self.max_nal_size {
                        return Err(ProtocolError::NalTooLarge {
                            size: src.len(),
                            max: self.max_nal_size,
                        });
                    }
                    self.scan_from = src.len().saturating_sub(START_CODE.len() - 1);
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(nal) = self.decode(src)? {
            return Ok(Some(nal));
        }

        if !self.synced || src.is_empty() {
            src.clear();
            return Ok(None);
        }

        let rest = src.split();
        self.scan_from = 0;
        let nal = trim_trailing_zeros(rest);
        if nal.is_empty() {
            Ok(None)
        } else {
            Ok(Some(nal))
        }
    }
}
