//! Offer/answer negotiation with real webrtc-rs peer connections

use peercall_core::call::{CallController, CallDeps, CallHandle, CallState};
use peercall_core::config::CallOptions;
use peercall_core::media::{LocalTrack, MediaConstraints, MediaKind, MediaStream, MediaTrack};
use peercall_core::peer::{ConnectionState, PeerEngine, PeerEvent, PeerRole, SdpType};
use peercall_core::relay::LoopbackRelay;
use peercall_core::setup::SetupResult;
use peercall_core::testing::FakeMediaDevices;
use peercall_webrtc::{EngineConfig, WebRtcEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(10);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,peercall_webrtc=debug")
        .try_init();
}

fn camera_and_mic() -> MediaStream {
    MediaStream::new(vec![
        Arc::new(LocalTrack::new(MediaKind::Audio, "Test Microphone", None)) as Arc<dyn MediaTrack>,
        Arc::new(LocalTrack::new(MediaKind::Video, "Test Camera", None)) as Arc<dyn MediaTrack>,
    ])
}

fn engine() -> WebRtcEngine {
    WebRtcEngine::new(EngineConfig::local_only()).unwrap()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> Vec<PeerEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test]
async fn test_offer_carries_local_tracks() {
    init_logging();
    let engine = engine();
    let (tx, _rx) = mpsc::unbounded_channel();

    let link = engine
        .open(PeerRole::Originator, &camera_and_mic(), tx)
        .await
        .unwrap();
    let offer = link.create_offer().await.unwrap();

    assert_eq!(offer.sdp_type, SdpType::Offer);
    assert!(offer.sdp.contains("m=audio"));
    assert!(offer.sdp.contains("m=video"));
    assert!(offer.sdp.to_lowercase().contains("opus/48000"));
    assert!(offer.sdp.contains("VP8/90000"));

    link.close().await.unwrap();
    link.close().await.unwrap();
    assert!(link.create_offer().await.is_err());
}

#[tokio::test]
async fn test_receiver_sees_caller_media_from_offer() {
    init_logging();
    let engine = engine();
    let (caller_tx, mut caller_rx) = mpsc::unbounded_channel();
    let (callee_tx, mut callee_rx) = mpsc::unbounded_channel();

    let caller = engine
        .open(PeerRole::Originator, &camera_and_mic(), caller_tx)
        .await
        .unwrap();
    // Callee joins without a camera or microphone
    let callee = engine
        .open(PeerRole::Receiver, &MediaStream::empty(), callee_tx)
        .await
        .unwrap();

    let offer = caller.create_offer().await.unwrap();
    let answer = callee.accept_offer(offer).await.unwrap();
    assert_eq!(answer.sdp_type, SdpType::Answer);
    caller.apply_answer(answer).await.unwrap();

    let remote = drain(&mut callee_rx)
        .into_iter()
        .find_map(|event| match event {
            PeerEvent::RemoteMedia(media) => Some(media),
            _ => None,
        })
        .expect("callee reported no remote media");
    assert!(remote.has_kind(MediaKind::Audio));
    assert!(remote.has_kind(MediaKind::Video));

    // The callee sends nothing back
    assert!(!drain(&mut caller_rx)
        .iter()
        .any(|event| matches!(event, PeerEvent::RemoteMedia(_))));

    caller.close().await.unwrap();
    callee.close().await.unwrap();
}

#[tokio::test]
async fn test_wrong_description_type_is_rejected() {
    let engine = engine();
    let (tx, _rx) = mpsc::unbounded_channel();
    let caller = engine
        .open(PeerRole::Originator, &camera_and_mic(), tx.clone())
        .await
        .unwrap();
    let offer = caller.create_offer().await.unwrap();
    assert!(caller.apply_answer(offer.clone()).await.is_err());

    let callee = engine
        .open(PeerRole::Receiver, &MediaStream::empty(), tx)
        .await
        .unwrap();
    let answer = peercall_core::SessionDescription::answer(offer.sdp);
    assert!(callee.accept_offer(answer).await.is_err());

    caller.close().await.unwrap();
    callee.close().await.unwrap();
}

async fn start_controller(relay: &LoopbackRelay, id: &str, name: &str) -> CallHandle {
    let deps = CallDeps {
        signaling: Arc::new(relay.client_with_id(id)),
        engine: Arc::new(engine()),
        devices: Arc::new(FakeMediaDevices::with_default_devices()),
    };
    let setup = SetupResult {
        name: name.to_string(),
        constraints: MediaConstraints::default(),
    };
    let (handle, _notices) = CallController::start(deps, setup, CallOptions::default()).await;
    handle
        .wait_for(WAIT, |v| v.local_id.is_some())
        .await
        .unwrap();
    handle
}

#[tokio::test]
async fn test_controllers_negotiate_over_webrtc() {
    init_logging();
    let relay = LoopbackRelay::new();
    let alice = start_controller(&relay, "alice", "Alice").await;
    let bob = start_controller(&relay, "bob", "Bob").await;

    bob.call("alice").await.unwrap();
    alice
        .wait_for(WAIT, |v| matches!(v.state, CallState::Ringing { .. }))
        .await
        .unwrap();
    alice.accept().await.unwrap();

    for handle in [&alice, &bob] {
        let view = handle
            .wait_for(WAIT, |v| {
                v.remote_media()
                    .is_some_and(|m| m.has_kind(MediaKind::Audio) && m.has_kind(MediaKind::Video))
            })
            .await
            .unwrap();
        assert!(matches!(view.state, CallState::Connected { .. }));
    }

    bob.hang_up().await.unwrap();
    assert!(matches!(bob.view().state, CallState::Ended));
    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

/// Needs a non-loopback network interface for host candidates
#[tokio::test]
#[ignore]
async fn test_links_reach_connected() {
    init_logging();
    let engine = engine();
    let (caller_tx, mut caller_rx) = mpsc::unbounded_channel();
    let (callee_tx, mut callee_rx) = mpsc::unbounded_channel();

    let caller = engine
        .open(PeerRole::Originator, &camera_and_mic(), caller_tx)
        .await
        .unwrap();
    let callee = engine
        .open(PeerRole::Receiver, &camera_and_mic(), callee_tx)
        .await
        .unwrap();

    let offer = caller.create_offer().await.unwrap();
    let answer = callee.accept_offer(offer).await.unwrap();
    caller.apply_answer(answer).await.unwrap();

    for rx in [&mut caller_rx, &mut callee_rx] {
        tokio::time::timeout(Duration::from_secs(30), async {
            while let Some(event) = rx.recv().await {
                if event == PeerEvent::StateChanged(ConnectionState::Connected) {
                    return;
                }
            }
            panic!("link events ended before connecting");
        })
        .await
        .expect("link never connected");
    }

    caller.close().await.unwrap();
    callee.close().await.unwrap();
}
