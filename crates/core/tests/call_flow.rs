//! Call flow integration tests
//!
//! Each test runs real controllers against the in-process relay with the fake
//! peer engine, so the full signaling handshake is exercised end to end.

use peercall_core::call::{
    CallController, CallDeps, CallHandle, CallState, Notice, NoticeLevel, SignalingStatus,
};
use peercall_core::config::CallOptions;
use peercall_core::media::{MediaConstraints, TrackConstraint};
use peercall_core::peer::{ConnectionState, PeerEvent, PeerRole};
use peercall_core::relay::{LoopbackRelay, LoopbackSignaling};
use peercall_core::setup::SetupResult;
use peercall_core::signaling::{AnswerCallParams, SignalingCommand, SignalingTransport};
use peercall_core::testing::{FakeMediaDevices, FakePeerEngine};
use peercall_core::{Error, SessionDescription};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(3);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,peercall_core=debug")
        .try_init();
}

struct Client {
    handle: CallHandle,
    notices: mpsc::UnboundedReceiver<Notice>,
    engine: FakePeerEngine,
    devices: Arc<FakeMediaDevices>,
}

impl Client {
    async fn start(relay: &LoopbackRelay, id: &str, name: &str) -> Self {
        Self::start_with(
            relay.client_with_id(id),
            name,
            MediaConstraints::default(),
            CallOptions::default(),
            Arc::new(FakeMediaDevices::with_default_devices()),
        )
        .await
    }

    async fn start_with(
        signaling: LoopbackSignaling,
        name: &str,
        constraints: MediaConstraints,
        options: CallOptions,
        devices: Arc<FakeMediaDevices>,
    ) -> Self {
        let engine = FakePeerEngine::new();
        let deps = CallDeps {
            signaling: Arc::new(signaling),
            engine: Arc::new(engine.clone()),
            devices: devices.clone(),
        };
        let setup = SetupResult {
            name: name.to_string(),
            constraints,
        };
        let (handle, notices) = CallController::start(deps, setup, options).await;
        Self {
            handle,
            notices,
            engine,
            devices,
        }
    }

    async fn ready(self) -> Self {
        self.handle
            .wait_for(WAIT, |v| v.local_id.is_some())
            .await
            .unwrap();
        self
    }

    async fn wait_state(&self, name: &str) -> CallState {
        self.handle
            .wait_for(WAIT, |v| v.state.name() == name)
            .await
            .unwrap_or_else(|_| panic!("never reached {}, at {}", name, self.handle.view().state))
            .state
    }

    async fn wait_connected_with_media(&self) {
        self.handle
            .wait_for(WAIT, |v| v.remote_media().is_some_and(|m| !m.is_empty()))
            .await
            .unwrap();
    }

    async fn next_notice(&mut self, level: NoticeLevel) -> Notice {
        loop {
            let notice = tokio::time::timeout(WAIT, self.notices.recv())
                .await
                .expect("timed out waiting for a notice")
                .expect("notice channel closed");
            if notice.level == level {
                return notice;
            }
        }
    }
}

#[tokio::test]
async fn test_alice_and_bob_connect() {
    init_logging();
    let relay = LoopbackRelay::new();
    let mut alice = Client::start(&relay, "alice-id", "Alice").await.ready().await;
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;

    assert_ok!(bob.handle.call("alice-id").await);

    let ringing = alice.wait_state("ringing").await;
    let CallState::Ringing { caller, .. } = ringing else {
        unreachable!()
    };
    assert_eq!(caller.id, "bob-id");
    assert_eq!(caller.display_name(), "Bob");
    let notice = alice.next_notice(NoticeLevel::Info).await;
    assert_eq!(notice.message, "Bob is calling");

    assert_ok!(alice.handle.accept().await);

    alice.wait_connected_with_media().await;
    bob.wait_connected_with_media().await;

    match alice.handle.view().state {
        CallState::Connected { role, peer, .. } => {
            assert_eq!(role, PeerRole::Receiver);
            assert_eq!(peer.display_name(), "Bob");
        }
        other => panic!("unexpected state {:?}", other),
    }
    match bob.handle.view().state {
        CallState::Connected { role, peer, .. } => {
            assert_eq!(role, PeerRole::Originator);
            assert_eq!(peer.id, "alice-id");
        }
        other => panic!("unexpected state {:?}", other),
    }

    assert_eq!(alice.engine.active_links(), 1);
    assert_eq!(bob.engine.active_links(), 1);
}

#[tokio::test]
async fn test_hang_up_releases_link_and_tracks() {
    let relay = LoopbackRelay::new();
    let alice = Client::start(&relay, "alice-id", "Alice").await.ready().await;
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;

    assert_ok!(bob.handle.call("alice-id").await);
    alice.wait_state("ringing").await;
    assert_ok!(alice.handle.accept().await);
    bob.wait_connected_with_media().await;
    assert_eq!(bob.handle.view().live_local_tracks(), 2);

    assert_ok!(bob.handle.hang_up().await);

    let view = bob.handle.view();
    assert_eq!(view.state, CallState::Ended);
    assert_eq!(view.live_local_tracks(), 0);
    assert!(!view.camera_on);
    assert!(!view.mic_on);
    assert_eq!(bob.engine.active_links(), 0);

    assert_ok!(alice.handle.hang_up().await);
    assert_eq!(alice.engine.active_links(), 0);
    assert_eq!(alice.handle.view().live_local_tracks(), 0);
}

#[tokio::test]
async fn test_unanswered_call_waits_without_timeout() {
    let relay = LoopbackRelay::new();
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;

    assert_ok!(bob.handle.call("nobody").await);
    bob.wait_state("awaiting-answer").await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        bob.handle.view().state,
        CallState::AwaitingAnswer {
            target: "nobody".to_string()
        }
    );
    assert_eq!(bob.engine.active_links(), 1);

    // Cancelling the pending call closes its link
    assert_ok!(bob.handle.hang_up().await);
    assert_eq!(bob.engine.active_links(), 0);
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let relay = LoopbackRelay::new();
    let options = CallOptions {
        answer_timeout_secs: Some(1),
        ..Default::default()
    };
    let mut bob = Client::start_with(
        relay.client_with_id("bob-id"),
        "Bob",
        MediaConstraints::default(),
        options,
        Arc::new(FakeMediaDevices::with_default_devices()),
    )
    .await
    .ready()
    .await;

    assert_ok!(bob.handle.call("nobody").await);
    bob.wait_state("awaiting-answer").await;

    let notice = bob.next_notice(NoticeLevel::Warning).await;
    assert!(notice.message.contains("nobody"));
    bob.wait_state("idle").await;
    assert_eq!(bob.engine.active_links(), 0);

    // Local media survives a timeout, the user can retry right away
    assert_eq!(bob.handle.view().live_local_tracks(), 2);
    assert!(bob.handle.view().can_call());
}

#[tokio::test]
async fn test_second_call_rejected_while_pending() {
    let relay = LoopbackRelay::new();
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;

    assert_ok!(bob.handle.call("nobody").await);
    let err = bob.handle.call("someone-else").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    bob.wait_state("awaiting-answer").await;
    assert_eq!(bob.engine.opened_links(), 1);
    assert_eq!(bob.engine.active_links(), 1);
}

#[tokio::test]
async fn test_accepted_while_idle_is_ignored() {
    let relay = LoopbackRelay::new();
    let alice = Client::start(&relay, "alice-id", "Alice").await.ready().await;

    let mallory = relay.client_with_id("mallory-id");
    mallory.connect().await.unwrap();
    mallory
        .send(SignalingCommand::AnswerCall(AnswerCallParams {
            signal: SessionDescription::answer("bogus"),
            to: "alice-id".to_string(),
        }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(alice.handle.view().state, CallState::Idle);
    assert_eq!(alice.engine.opened_links(), 0);
}

#[tokio::test]
async fn test_decline_then_new_caller() {
    let relay = LoopbackRelay::new();
    let alice = Client::start(&relay, "alice-id", "Alice").await.ready().await;
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;
    let carol = Client::start(&relay, "carol-id", "Carol").await.ready().await;

    assert_ok!(bob.handle.call("alice-id").await);
    alice.wait_state("ringing").await;
    assert_ok!(alice.handle.decline().await);
    assert_eq!(alice.handle.view().state, CallState::Idle);
    assert_eq!(alice.engine.opened_links(), 0);

    assert_ok!(carol.handle.call("alice-id").await);
    let ringing = alice.wait_state("ringing").await;
    assert_eq!(ringing.to_string(), "ringing (Carol)");

    assert_ok!(alice.handle.accept().await);
    alice.wait_connected_with_media().await;
    carol.wait_connected_with_media().await;
    assert_eq!(alice.engine.opened_links(), 1);

    // Declining sent nothing back, so Bob is still waiting
    assert_eq!(bob.handle.view().state.name(), "awaiting-answer");
}

#[tokio::test]
async fn test_negotiation_failure_returns_to_idle() {
    let relay = LoopbackRelay::new();
    let mut bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;

    bob.engine.set_fail_negotiation(true);
    assert_ok!(bob.handle.call("alice-id").await);

    let notice = bob.next_notice(NoticeLevel::Error).await;
    assert!(notice.message.starts_with("Call failed"));
    bob.wait_state("idle").await;
    assert_eq!(bob.engine.active_links(), 0);

    bob.engine.set_fail_negotiation(false);
    assert_ok!(bob.handle.call("alice-id").await);
    bob.wait_state("awaiting-answer").await;
}

#[tokio::test]
async fn test_call_refused_until_identity_assigned() {
    let relay = LoopbackRelay::new();
    let squatter = relay.client_with_id("taken");
    squatter.connect().await.unwrap();

    // Connecting with an id already in use fails, so no identity ever arrives
    let mut bob = Client::start_with(
        relay.client_with_id("taken"),
        "Bob",
        MediaConstraints::default(),
        CallOptions::default(),
        Arc::new(FakeMediaDevices::with_default_devices()),
    )
    .await;

    bob.next_notice(NoticeLevel::Error).await;
    let view = bob
        .handle
        .wait_for(WAIT, |v| v.signaling == SignalingStatus::Offline)
        .await
        .unwrap();
    assert!(view.local_id.is_none());
    assert!(!view.can_call());

    let err = bob.handle.call("alice-id").await.unwrap_err();
    assert!(matches!(err, Error::NotReady(_)));
}

#[tokio::test]
async fn test_media_failure_does_not_abort_call_flow() {
    let relay = LoopbackRelay::new();
    let devices = Arc::new(FakeMediaDevices::with_default_devices());
    devices.set_fail_acquisition(true);

    let mut bob = Client::start_with(
        relay.client_with_id("bob-id"),
        "Bob",
        MediaConstraints::default(),
        CallOptions::default(),
        devices,
    )
    .await;
    let notice = bob.next_notice(NoticeLevel::Error).await;
    assert!(notice.message.contains("camera/microphone"));

    let bob = bob.ready().await;
    let view = bob.handle.view();
    assert!(view.local_tracks.is_empty());
    assert!(!view.camera_on);
    assert!(view.can_call());

    assert_ok!(bob.handle.call("nobody").await);
    bob.wait_state("awaiting-answer").await;
}

#[tokio::test]
async fn test_toggles_restore_tracks() {
    let relay = LoopbackRelay::new();
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;

    assert!(!bob.handle.toggle_camera().await.unwrap());
    let view = bob.handle.view();
    assert!(!view.camera_on);
    assert!(view.mic_on);
    assert!(view
        .local_tracks
        .iter()
        .filter(|t| t.kind == peercall_core::media::MediaKind::Video)
        .all(|t| !t.enabled));

    assert!(bob.handle.toggle_camera().await.unwrap());
    assert!(!bob.handle.toggle_mic().await.unwrap());
    assert!(bob.handle.toggle_mic().await.unwrap());
    assert!(bob.handle.view().local_tracks.iter().all(|t| t.enabled));
}

#[tokio::test]
async fn test_toggle_without_tracks_is_noop() {
    let relay = LoopbackRelay::new();
    let constraints = MediaConstraints {
        video: TrackConstraint::Disabled,
        audio: TrackConstraint::Disabled,
    };
    let bob = Client::start_with(
        relay.client_with_id("bob-id"),
        "Bob",
        constraints,
        CallOptions::default(),
        Arc::new(FakeMediaDevices::with_default_devices()),
    )
    .await
    .ready()
    .await;

    assert!(bob.handle.view().local_tracks.is_empty());
    assert!(!bob.handle.toggle_camera().await.unwrap());
    assert!(!bob.handle.toggle_camera().await.unwrap());
    assert!(!bob.handle.toggle_mic().await.unwrap());
}

#[tokio::test]
async fn test_reacquire_media_after_call() {
    let relay = LoopbackRelay::new();
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;
    assert_eq!(bob.devices.acquisitions(), 1);

    assert_ok!(bob.handle.call("nobody").await);
    bob.wait_state("awaiting-answer").await;
    let err = bob
        .handle
        .reacquire_media(MediaConstraints::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    assert_ok!(bob.handle.hang_up().await);
    assert_eq!(bob.handle.view().live_local_tracks(), 0);

    bob.handle
        .reacquire_media(MediaConstraints::default())
        .await
        .unwrap();
    let view = bob.handle.view();
    assert_eq!(view.live_local_tracks(), 2);
    assert!(view.camera_on && view.mic_on);
    assert_eq!(bob.devices.acquisitions(), 2);
}

#[tokio::test]
async fn test_remote_close_ends_call() {
    let relay = LoopbackRelay::new();
    let alice = Client::start(&relay, "alice-id", "Alice").await.ready().await;
    let mut bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;

    assert_ok!(bob.handle.call("alice-id").await);
    alice.wait_state("ringing").await;
    assert_ok!(alice.handle.accept().await);
    bob.wait_connected_with_media().await;

    assert!(bob
        .engine
        .emit(PeerEvent::StateChanged(ConnectionState::Closed)));
    bob.wait_state("ended").await;

    let notice = bob.next_notice(NoticeLevel::Info).await;
    assert_eq!(notice.message, "alice-id ended the call");
    assert_eq!(bob.engine.active_links(), 0);
    assert_eq!(bob.handle.view().live_local_tracks(), 0);
}

#[tokio::test]
async fn test_signaling_loss_is_reported() {
    let relay = LoopbackRelay::new();
    let mut bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;
    assert_eq!(bob.handle.view().signaling, SignalingStatus::Online);

    relay.drop_client("bob-id", "relay restarted");
    let notice = bob.next_notice(NoticeLevel::Error).await;
    assert!(notice.message.contains("relay restarted"));
    let view = bob
        .handle
        .wait_for(WAIT, |v| v.signaling == SignalingStatus::Offline)
        .await
        .unwrap();
    assert_eq!(view.local_id, None);
}

#[tokio::test]
async fn test_call_refused_after_signaling_loss() {
    let relay = LoopbackRelay::new();
    let _alice = Client::start(&relay, "alice-id", "Alice").await.ready().await;
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;

    relay.drop_client("bob-id", "relay restarted");
    bob.handle
        .wait_for(WAIT, |v| v.signaling == SignalingStatus::Offline)
        .await
        .unwrap();

    let err = assert_err!(bob.handle.call("alice-id").await);
    assert!(matches!(err, Error::NotReady(_)));
    assert_eq!(bob.engine.opened_links(), 0);
    assert_eq!(bob.handle.view().state, CallState::Idle);
}

#[tokio::test]
async fn test_shutdown_stops_controller() {
    let relay = LoopbackRelay::new();
    let bob = Client::start(&relay, "bob-id", "Bob").await.ready().await;
    assert_ok!(bob.handle.call("nobody").await);
    bob.wait_state("awaiting-answer").await;

    assert_ok!(bob.handle.shutdown().await);
    assert_eq!(bob.engine.active_links(), 0);
    assert!(matches!(
        bob.handle.toggle_mic().await,
        Err(Error::ChannelClosed(_))
    ));
}
