//! Elementary-stream pump
//!
//! Reads an Annex-B H.264 byte stream, splits it into NAL units, packetizes
//! each one and writes RTP packets to a sink. The pump does not start
//! reading until the transport's readiness gate opens.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;

use hs_core::traits::VideoStream;
use hs_protocol::{H264Packetizer, NalCodec, RtpPayload};

use super::gate::ReadinessGate;
use super::TransportError;

/// Destination for RTP packets
#[async_trait]
pub trait RtpSink: Send + Sync {
    async fn write(&self, packet: &Packet) -> Result<(), TransportError>;
}

/// Why a pump stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The capture stream reached EOF
    SourceEnded,
    /// Reading or framing the capture stream failed
    SourceError(String),
    /// Writing to the transport failed
    SinkError(String),
    /// The transport was closed
    Closed,
}

impl PumpExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, PumpExit::SourceError(_) | PumpExit::SinkError(_))
    }
}

/// Everything a pump needs besides its source
#[derive(Clone)]
pub struct PumpContext {
    pub sink: Arc<dyn RtpSink>,
    pub gate: ReadinessGate,
    /// Negotiated H.264 payload type, read for every packet so a
    /// renegotiation takes effect mid-stream
    pub payload_type: Arc<AtomicU8>,
    pub closed: CancellationToken,
    pub mtu: usize,
}

/// RTP header state for one outbound stream
struct RtpStream {
    ssrc: u32,
    sequence_number: u16,
    timestamp_base: u32,
}

impl RtpStream {
    fn random() -> Self {
        Self {
            ssrc: rand::random(),
            sequence_number: rand::random(),
            timestamp_base: rand::random(),
        }
    }

    fn packet(&mut self, rtp: RtpPayload, payload_type: u8) -> Packet {
        let packet = Packet {
            header: Header {
                version: 2,
                marker: rtp.marker,
                payload_type,
                sequence_number: self.sequence_number,
                timestamp: self.timestamp_base.wrapping_add(rtp.timestamp),
                ssrc: self.ssrc,
                ..Default::default()
            },
            payload: rtp.payload,
        };
        self.sequence_number = self.sequence_number.wrapping_add(1);
        packet
    }
}

async fn write_all(
    ctx: &PumpContext,
    stream: &mut RtpStream,
    payloads: Vec<RtpPayload>,
    sent: &mut u64,
) -> Result<(), TransportError> {
    for rtp in payloads {
        let packet = stream.packet(rtp, ctx.payload_type.load(Ordering::Acquire));
        ctx.sink.write(&packet).await?;
        *sent += 1;
    }
    Ok(())
}

pub async fn run_pump(stream: VideoStream, fps: u32, ctx: PumpContext) -> PumpExit {
    tokio::select! {
        _ = ctx.closed.cancelled() => return PumpExit::Closed,
        _ = ctx.gate.wait() => {}
    }

    let mut rtp = RtpStream::random();
    let mut packetizer = H264Packetizer::new(ctx.mtu, fps);
    let mut nals = FramedRead::new(stream, NalCodec::new());

    tracing::info!(
        "Media pump started (pt {}, ssrc {:#010x}, {} fps)",
        ctx.payload_type.load(Ordering::Acquire),
        rtp.ssrc,
        fps
    );

    let mut sent: u64 = 0;
    loop {
        let nal = tokio::select! {
            biased;
            _ = ctx.closed.cancelled() => return PumpExit::Closed,
            next = nals.next() => match next {
                Some(Ok(nal)) => nal,
                Some(Err(e)) => return PumpExit::SourceError(e.to_string()),
                None => {
                    let tail = packetizer.flush();
                    if let Err(e) = write_all(&ctx, &mut rtp, tail, &mut sent).await {
                        return PumpExit::SinkError(e.to_string());
                    }
                    tracing::info!("Capture stream ended after {} packets", sent);
                    return PumpExit::SourceEnded;
                }
            },
        };

        let payloads = match packetizer.packetize(&nal) {
            Ok(payloads) => payloads,
            Err(e) => {
                tracing::debug!("Skipping NAL unit: {}", e);
                continue;
            }
        };

        if let Err(e) = write_all(&ctx, &mut rtp, payloads, &mut sent).await {
            return PumpExit::SinkError(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Collect {
        packets: Mutex<Vec<Packet>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl RtpSink for Collect {
        async fn write(&self, packet: &Packet) -> Result<(), TransportError> {
            let mut packets = self.packets.lock().unwrap();
            if self.fail_after.is_some_and(|n| packets.len() >= n) {
                return Err(TransportError::Write("peer gone".into()));
            }
            packets.push(packet.clone());
            Ok(())
        }
    }

    fn annex_b(nals: &[&[u8]]) -> VideoStream {
        let mut buf = Vec::new();
        for nal in nals {
            buf.extend_from_slice(&[0, 0, 0, 1]);
            buf.extend_from_slice(nal);
        }
        Box::new(std::io::Cursor::new(buf))
    }

    fn context(sink: Arc<Collect>, mtu: usize) -> PumpContext {
        PumpContext {
            sink,
            gate: ReadinessGate::new(),
            payload_type: Arc::new(AtomicU8::new(0)),
            closed: CancellationToken::new(),
            mtu,
        }
    }

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1F];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x10];
    const P_SLICE: &[u8] = &[0x41, 0x9A, 0x02, 0x03];

    #[tokio::test]
    async fn test_waits_for_gate_then_streams() {
        let sink = Arc::new(Collect::default());
        let ctx = context(sink.clone(), 1200);
        ctx.payload_type.store(102, Ordering::Release);

        let handle = tokio::spawn(run_pump(annex_b(&[SPS, PPS, IDR, P_SLICE]), 30, ctx.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.packets.lock().unwrap().is_empty());

        ctx.gate.open();
        assert_eq!(handle.await.unwrap(), PumpExit::SourceEnded);

        let packets = sink.packets.lock().unwrap();
        assert_eq!(packets.len(), 4);
        assert!(packets.iter().all(|p| p.header.payload_type == 102));

        let markers: Vec<bool> = packets.iter().map(|p| p.header.marker).collect();
        assert_eq!(markers, vec![false, false, true, true]);

        // parameter sets share the first picture's timestamp
        let ts: Vec<u32> = packets.iter().map(|p| p.header.timestamp).collect();
        assert_eq!(ts[0], ts[2]);
        assert_eq!(ts[3].wrapping_sub(ts[2]), 3000);

        for pair in packets.windows(2) {
            assert_eq!(
                pair[1].header.sequence_number,
                pair[0].header.sequence_number.wrapping_add(1)
            );
            assert_eq!(pair[0].header.ssrc, pair[1].header.ssrc);
        }
    }

    #[tokio::test]
    async fn test_large_unit_fragmented_under_mtu() {
        let mut idr = vec![0x65, 0x88];
        idr.resize(2500, 0x11);

        let sink = Arc::new(Collect::default());
        let ctx = context(sink.clone(), 1200);
        ctx.gate.open();

        let exit = run_pump(annex_b(&[idr.as_slice()]), 30, ctx).await;
        assert_eq!(exit, PumpExit::SourceEnded);

        let packets = sink.packets.lock().unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.payload.len() <= 1200));
        assert_eq!(
            packets.iter().filter(|p| p.header.marker).count(),
            1,
            "only the last fragment is marked"
        );
        assert!(packets[2].header.marker);
    }

    #[tokio::test]
    async fn test_sink_failure_stops_pump() {
        let sink = Arc::new(Collect {
            fail_after: Some(1),
            ..Default::default()
        });
        let ctx = context(sink.clone(), 1200);
        ctx.gate.open();

        let exit = run_pump(annex_b(&[SPS, PPS, IDR]), 30, ctx).await;
        assert!(matches!(exit, PumpExit::SinkError(_)));
        assert!(exit.is_failure());
        assert_eq!(sink.packets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_before_ready() {
        let sink = Arc::new(Collect::default());
        let ctx = context(sink.clone(), 1200);
        ctx.closed.cancel();

        let exit = run_pump(annex_b(&[IDR]), 30, ctx).await;
        assert_eq!(exit, PumpExit::Closed);
        assert!(sink.packets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_renegotiated_payload_type_applies_mid_stream() {
        let sink = Arc::new(Collect::default());
        let ctx = context(sink.clone(), 1200);
        ctx.payload_type.store(102, Ordering::Release);
        ctx.gate.open();

        let (mut writer, reader) = tokio::io::duplex(4096);
        let handle = tokio::spawn(run_pump(Box::new(reader), 30, ctx.clone()));

        for nal in [SPS, PPS, IDR, P_SLICE] {
            writer.write_all(&[0, 0, 0, 1]).await.unwrap();
            writer.write_all(nal).await.unwrap();
        }
        // the P slice is only framed once the next start code arrives
        writer.write_all(&[0, 0, 0, 1]).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.packets.lock().unwrap().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        ctx.payload_type.store(125, Ordering::Release);
        writer.write_all(P_SLICE).await.unwrap();
        drop(writer);

        assert_eq!(handle.await.unwrap(), PumpExit::SourceEnded);
        let pts: Vec<u8> = sink
            .packets
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.header.payload_type)
            .collect();
        assert_eq!(pts, vec![102, 102, 102, 125, 125]);
    }
}
