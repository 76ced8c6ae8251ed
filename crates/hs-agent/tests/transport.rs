//! WebRTC transport integration tests
//!
//! A local viewer peer connection negotiates against the agent transport.
//! No ICE servers are configured, so gathering only yields host candidates.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use hs_agent::input::{InputDispatcher, LogInjector};
use hs_agent::transport::{
    PumpExit, StreamTransport, TransportError, TransportFactory, WebRtcTransportFactory,
    INPUT_CHANNEL,
};
use hs_core::config::TransportConfig;
use hs_core::traits::InputInjector;
use hs_core::InjectError;
use hs_protocol::{InputRecord, MouseButton};

/// Records pointer moves, accepts everything else
#[derive(Default)]
struct PointerLog {
    moves: Mutex<Vec<(i32, i32)>>,
}

impl InputInjector for PointerLog {
    fn key(&self, _scan_code: u16, _down: bool) -> Result<(), InjectError> {
        Ok(())
    }

    fn move_pointer(&self, dx: i32, dy: i32) -> Result<(), InjectError> {
        self.moves.lock().unwrap().push((dx, dy));
        Ok(())
    }

    fn button(&self, _button: MouseButton, _down: bool) -> Result<(), InjectError> {
        Ok(())
    }

    fn scroll(&self, _delta: i32) -> Result<(), InjectError> {
        Ok(())
    }
}

fn local_config() -> TransportConfig {
    TransportConfig {
        ice_servers: vec![],
        gather_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Viewer peer with a recvonly video transceiver and one data channel
async fn viewer_with_channel(label: &str) -> Arc<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );
    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await
    .unwrap();
    pc.create_data_channel(label, None).await.unwrap();
    pc
}

async fn viewer() -> Arc<RTCPeerConnection> {
    viewer_with_channel("input").await
}

async fn offer_from(pc: &RTCPeerConnection) -> String {
    let offer = pc.create_offer(None).await.unwrap();
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), gathered.recv()).await;
    pc.local_description().await.unwrap().sdp
}

async fn transport_with(injector: Arc<dyn InputInjector>) -> Arc<dyn StreamTransport> {
    WebRtcTransportFactory::new(local_config())
        .unwrap()
        .create(InputDispatcher::new(injector))
        .await
        .unwrap()
}

async fn transport() -> Arc<dyn StreamTransport> {
    transport_with(Arc::new(LogInjector)).await
}

async fn accept_answer(viewer: &RTCPeerConnection, answer: String) {
    viewer
        .set_remote_description(RTCSessionDescription::answer(answer).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_offer_yields_video_answer() {
    let viewer = viewer().await;
    let transport = transport().await;
    assert!(!transport.is_ready());

    let answer = transport.handle_offer(&offer_from(&viewer).await).await.unwrap();
    assert!(answer.contains("m=video"));
    assert!(answer.contains("H264"));
    assert!(answer.contains("m=application"));
    assert!(transport.is_ready());

    viewer
        .set_remote_description(RTCSessionDescription::answer(answer).unwrap())
        .await
        .unwrap();

    transport.close().await;
    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_garbage_offer_is_negotiation_error() {
    let transport = transport().await;
    let err = transport.handle_offer("not an sdp").await.unwrap_err();
    assert!(matches!(err, TransportError::NegotiationFailed(_)));
    assert!(!transport.is_ready());
    transport.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let viewer = viewer().await;
    let transport = transport().await;

    transport.close().await;
    transport.close().await;

    let err = transport
        .handle_offer(&offer_from(&viewer).await)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Closed));
    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_host_opens_unordered_input_channel() {
    // a viewer that only opens a placeholder channel and waits for the host's
    let viewer = viewer_with_channel("_bootstrap").await;
    let (tx, mut opened) = mpsc::unbounded_channel::<Arc<RTCDataChannel>>();
    viewer.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(dc);
        })
    }));

    let pointer = Arc::new(PointerLog::default());
    let transport = transport_with(pointer.clone()).await;

    let answer = transport.handle_offer(&offer_from(&viewer).await).await.unwrap();
    assert!(answer.contains("m=application"));
    accept_answer(&viewer, answer).await;

    let dc = tokio::time::timeout(Duration::from_secs(10), opened.recv())
        .await
        .expect("host channel never reached the viewer")
        .unwrap();
    assert_eq!(dc.label(), INPUT_CHANNEL);
    assert!(!dc.ordered());

    let record = InputRecord {
        kind: 1,
        action: 2,
        button: 0,
        keycode: 0,
        x: 5,
        y: -3,
    };
    dc.send(&Bytes::copy_from_slice(&record.to_bytes()))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while pointer.moves.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("record never dispatched");
    assert_eq!(*pointer.moves.lock().unwrap(), vec![(5, -3)]);

    transport.close().await;
    viewer.close().await.unwrap();
}

#[tokio::test]
async fn test_renegotiation_keeps_transport_ready() {
    let viewer = viewer().await;
    let transport = transport().await;

    // the pump is started before any offer and must wait for the first one
    let pump = transport.start_stream(Box::new(tokio::io::empty()), 30);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pump.is_finished());

    let first = transport.handle_offer(&offer_from(&viewer).await).await.unwrap();
    assert!(!first.is_empty());
    assert!(transport.is_ready());
    accept_answer(&viewer, first).await;

    let exit = tokio::time::timeout(Duration::from_secs(5), pump)
        .await
        .expect("pump not released by the first answer")
        .unwrap();
    assert_eq!(exit, PumpExit::SourceEnded);

    let second = transport.handle_offer(&offer_from(&viewer).await).await.unwrap();
    assert!(!second.is_empty());
    assert!(second.contains("m=video"));
    assert!(transport.is_ready());
    accept_answer(&viewer, second).await;

    transport.close().await;
    viewer.close().await.unwrap();
}
