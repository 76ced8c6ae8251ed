//! WebRTC implementation of [`StreamTransport`]

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

use hs_core::config::TransportConfig;
use hs_core::traits::VideoStream;

use super::{run_pump, PumpContext, PumpExit, ReadinessGate, RtpSink, StreamTransport};
use super::{TransportError, TransportFactory};
use crate::input::InputDispatcher;

/// Label of the data channel carrying input records
///
/// The host opens one itself, unordered with no retransmits. A channel the
/// viewer opens under the same label is accepted too.
pub const INPUT_CHANNEL: &str = "input";

/// Payload type used until negotiation says otherwise
const DEFAULT_PAYLOAD_TYPE: u8 = 102;

const H264_CLOCK_RATE: u32 = 90_000;
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Creates [`WebRtcTransport`]s from a shared WebRTC API instance
pub struct WebRtcTransportFactory {
    api: Arc<API>,
    config: TransportConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::InitFailed(format!("register codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| TransportError::InitFailed(format!("register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api: Arc::new(api),
            config,
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        input: InputDispatcher,
    ) -> Result<Arc<dyn StreamTransport>, TransportError> {
        let transport = WebRtcTransport::new(
            &self.api,
            self.rtc_configuration(),
            input,
            self.config.gather_timeout,
            self.config.mtu,
        )
        .await?;
        Ok(Arc::new(transport))
    }
}

/// Dispatch binary messages on an input channel
fn route_input(dc: &Arc<RTCDataChannel>, dispatcher: InputDispatcher) {
    let label = dc.label().to_owned();
    dc.on_open(Box::new(move || {
        tracing::info!("Input channel '{}' open", label);
        Box::pin(async {})
    }));
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        if msg.is_string {
            tracing::debug!("Dropping text message on input channel");
        } else {
            dispatcher.handle_record(&msg.data);
        }
        Box::pin(async {})
    }));
}

/// One peer connection with one outbound H.264 track
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticRTP>,
    gate: ReadinessGate,
    payload_type: Arc<AtomicU8>,
    closed: CancellationToken,
    closing: AtomicBool,
    /// Serializes offer handling
    negotiation: Mutex<()>,
    gather_timeout: Duration,
    mtu: usize,
}

impl WebRtcTransport {
    async fn new(
        api: &API,
        config: RTCConfiguration,
        input: InputDispatcher,
        gather_timeout: Duration,
        mtu: usize,
    ) -> Result<Self, TransportError> {
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| TransportError::InitFailed(format!("peer connection: {e}")))?,
        );

        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: H264_CLOCK_RATE,
                sdp_fmtp_line: H264_FMTP.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "hoststream".to_owned(),
        ));

        let rtp_sender = match pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                let _ = pc.close().await;
                return Err(TransportError::InitFailed(format!("add track: {e}")));
            }
        };

        // RTCP has to be drained for the interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let closed = CancellationToken::new();

        let on_state = closed.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::info!("Peer connection state: {}", state);
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                on_state.cancel();
            }
            Box::pin(async {})
        }));

        let host_channel = match pc
            .create_data_channel(
                INPUT_CHANNEL,
                Some(RTCDataChannelInit {
                    ordered: Some(false),
                    max_retransmits: Some(0),
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(dc) => dc,
            Err(e) => {
                let _ = pc.close().await;
                return Err(TransportError::InitFailed(format!("input channel: {e}")));
            }
        };
        route_input(&host_channel, input.clone());

        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let dispatcher = input.clone();
            Box::pin(async move {
                if dc.label() != INPUT_CHANNEL {
                    tracing::debug!("Ignoring data channel '{}'", dc.label());
                    return;
                }
                route_input(&dc, dispatcher);
            })
        }));

        Ok(Self {
            pc,
            track,
            gate: ReadinessGate::new(),
            payload_type: Arc::new(AtomicU8::new(DEFAULT_PAYLOAD_TYPE)),
            closed,
            closing: AtomicBool::new(false),
            negotiation: Mutex::new(()),
            gather_timeout,
            mtu,
        })
    }

    /// Payload type the pump will stamp on packets
    pub fn payload_type(&self) -> u8 {
        self.payload_type.load(Ordering::Acquire)
    }

    async fn negotiate(&self, sdp: &str) -> Result<String, TransportError> {
        let offer = RTCSessionDescription::offer(sdp.to_owned())
            .map_err(|e| TransportError::NegotiationFailed(format!("invalid offer: {e}")))?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| TransportError::NegotiationFailed(format!("set remote: {e}")))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::NegotiationFailed(format!("create answer: {e}")))?;

        let mut gathered = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| TransportError::NegotiationFailed(format!("set local: {e}")))?;

        if tokio::time::timeout(self.gather_timeout, gathered.recv())
            .await
            .is_err()
        {
            tracing::warn!(
                "ICE gathering did not finish within {:?}, answering with partial candidates",
                self.gather_timeout
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::NegotiationFailed("no local description".into()))?;

        self.lock_payload_type().await;
        Ok(local.sdp)
    }

    async fn lock_payload_type(&self) {
        for sender in self.pc.get_senders().await {
            let params = sender.get_parameters().await;
            if let Some(pt) = h264_payload_type(&params.rtp_parameters.codecs) {
                let previous = self.payload_type.swap(pt, Ordering::AcqRel);
                if previous != pt {
                    tracing::info!("Negotiated H.264 payload type {}", pt);
                }
                return;
            }
        }
        tracing::warn!(
            "No H.264 codec in negotiated parameters, keeping payload type {}",
            self.payload_type()
        );
    }
}

/// Pick the H.264 payload type, preferring packetization mode 1
pub(crate) fn h264_payload_type(codecs: &[RTCRtpCodecParameters]) -> Option<u8> {
    let mut h264 = codecs
        .iter()
        .filter(|c| c.capability.mime_type.eq_ignore_ascii_case(MIME_TYPE_H264));

    let first = h264.clone().next()?;
    let preferred = h264
        .find(|c| c.capability.sdp_fmtp_line.contains("packetization-mode=1"))
        .unwrap_or(first);
    Some(preferred.payload_type)
}

#[async_trait]
impl StreamTransport for WebRtcTransport {
    async fn handle_offer(&self, sdp: &str) -> Result<String, TransportError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let _guard = self.negotiation.lock().await;
        let answer = self.negotiate(sdp).await?;

        if self.gate.open() {
            tracing::info!("Signaling complete, media pump released");
        }
        Ok(answer)
    }

    fn start_stream(&self, stream: VideoStream, fps: u32) -> JoinHandle<PumpExit> {
        let ctx = PumpContext {
            sink: Arc::clone(&self.track) as Arc<dyn RtpSink>,
            gate: self.gate.clone(),
            payload_type: Arc::clone(&self.payload_type),
            closed: self.closed.clone(),
            mtu: self.mtu,
        };
        tokio::spawn(run_pump(stream, fps, ctx))
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Error closing peer connection: {}", e);
        }
    }

    fn is_ready(&self) -> bool {
        self.gate.is_open()
    }
}

#[async_trait]
impl RtpSink for TrackLocalStaticRTP {
    async fn write(&self, packet: &Packet) -> Result<(), TransportError> {
        self.write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::media_engine::MIME_TYPE_VP8;

    fn codec(mime: &str, fmtp: &str, pt: u8) -> RTCRtpCodecParameters {
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: mime.to_owned(),
                clock_rate: H264_CLOCK_RATE,
                sdp_fmtp_line: fmtp.to_owned(),
                ..Default::default()
            },
            payload_type: pt,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_packetization_mode_one() {
        let codecs = vec![
            codec(MIME_TYPE_VP8, "", 96),
            codec("video/h264", "packetization-mode=0", 127),
            codec(MIME_TYPE_H264, "packetization-mode=1;profile-level-id=42e01f", 125),
        ];
        assert_eq!(h264_payload_type(&codecs), Some(125));
    }

    #[test]
    fn test_falls_back_to_first_h264() {
        let codecs = vec![codec(MIME_TYPE_H264, "packetization-mode=0", 127)];
        assert_eq!(h264_payload_type(&codecs), Some(127));
        assert_eq!(h264_payload_type(&[codec(MIME_TYPE_VP8, "", 96)]), None);
    }
}
