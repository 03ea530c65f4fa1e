//! Peer link over a webrtc-rs `RTCPeerConnection`

use super::sdp::remote_media_from_sdp;
use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_core::media::{MediaKind, MediaStream};
use peercall_core::peer::{
    ConnectionState, PeerEvent, PeerEventSender, PeerLink, PeerRole, RemoteMedia, RemoteTrack,
    SdpType, SessionDescription,
};
use peercall_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::API;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// State shared with the webrtc-rs callbacks
struct LinkShared {
    id: String,
    events: PeerEventSender,
    closed: AtomicBool,
    state: Mutex<ConnectionState>,
    remote: Mutex<RemoteMedia>,
}

impl LinkShared {
    fn emit(&self, event: PeerEvent) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.events.send(event);
        }
    }

    fn set_state(&self, new_state: ConnectionState) {
        {
            let mut state = self.state.lock();
            if *state == new_state {
                return;
            }
            debug!(
                "Link {} state transition: {:?} -> {:?}",
                self.id, *state, new_state
            );
            *state = new_state;
        }
        self.emit(PeerEvent::StateChanged(new_state));
    }

    /// Fold newly seen remote tracks in and report the cumulative set
    fn merge_remote(&self, media: RemoteMedia) {
        let snapshot = {
            let mut remote = self.remote.lock();
            let before = remote.tracks.len();
            if remote.stream_id.is_empty() {
                remote.stream_id = media.stream_id;
            }
            for track in media.tracks {
                remote.add_track(track);
            }
            if remote.tracks.len() == before {
                return;
            }
            remote.clone()
        };
        self.emit(PeerEvent::RemoteMedia(snapshot));
    }
}

fn codec_type(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

fn codec_capability(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            ..Default::default()
        },
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// One call's peer connection
///
/// Every live local track is published as a sample track (Opus audio, VP8
/// video). Descriptions are sent only after ICE gathering completes, or
/// after the gathering timeout with whatever candidates were found.
pub struct WebRtcPeerLink {
    role: PeerRole,
    peer_connection: Arc<RTCPeerConnection>,
    shared: Arc<LinkShared>,
    gathering_timeout: Duration,
}

impl WebRtcPeerLink {
    pub(crate) async fn open(
        api: &API,
        rtc_config: RTCConfiguration,
        role: PeerRole,
        local: &MediaStream,
        events: PeerEventSender,
        gathering_timeout: Duration,
    ) -> Result<Self> {
        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let shared = Arc::new(LinkShared {
            id: uuid::Uuid::new_v4().to_string(),
            events,
            closed: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::New),
            remote: Mutex::new(RemoteMedia::default()),
        });

        let link = Self {
            role,
            peer_connection,
            shared,
            gathering_timeout,
        };
        link.register_handlers();

        if let Err(e) = link.add_local_tracks(local).await {
            let _ = link.close().await;
            return Err(e);
        }

        info!("Opened peer link {} as {}", link.shared.id, role);
        Ok(link)
    }

    fn register_handlers(&self) {
        let shared = self.shared.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let shared = shared.clone();
                Box::pin(async move {
                    if let Some(state) = map_state(state) {
                        shared.set_state(state);
                    }
                })
            }));

        let shared = self.shared.clone();
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let shared = shared.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        RTPCodecType::Video => MediaKind::Video,
                        _ => return,
                    };
                    info!(
                        "Link {} received remote {} track {}",
                        shared.id,
                        kind,
                        track.id()
                    );
                    shared.merge_remote(RemoteMedia {
                        stream_id: track.stream_id(),
                        tracks: vec![RemoteTrack {
                            id: track.id(),
                            kind,
                        }],
                    });

                    // Drain RTP so the receive pipeline keeps flowing
                    tokio::spawn(async move { while track.read_rtp().await.is_ok() {} });
                })
            },
        ));
    }

    async fn add_local_tracks(&self, local: &MediaStream) -> Result<()> {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let Some(track) = local.tracks_of(kind).find(|t| t.is_live()) else {
                if self.role == PeerRole::Originator {
                    // Still ask for the remote side's media of this kind
                    self.peer_connection
                        .add_transceiver_from_kind(
                            codec_type(kind),
                            Some(RTCRtpTransceiverInit {
                                direction: RTCRtpTransceiverDirection::Recvonly,
                                send_encodings: vec![],
                            }),
                        )
                        .await
                        .map_err(|e| {
                            Error::PeerConnectionError(format!(
                                "Failed to add {} transceiver: {}",
                                kind, e
                            ))
                        })?;
                }
                continue;
            };

            let sample = Arc::new(TrackLocalStaticSample::new(
                codec_capability(kind),
                track.id().to_string(),
                local.id().to_string(),
            ));
            let sender = self
                .peer_connection
                .add_track(sample as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| {
                    Error::PeerConnectionError(format!("Failed to add {} track: {}", kind, e))
                })?;

            // RTCP has to be read for interceptors to work
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
            debug!("Link {} publishing {} track {}", self.shared.id, kind, track.id());
        }
        Ok(())
    }

    /// Set the local description and wait for candidates
    async fn set_local_and_gather(&self, description: RTCSessionDescription) -> Result<String> {
        let mut gathered = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(self.gathering_timeout, gathered.recv())
            .await
            .is_err()
        {
            warn!(
                "Link {}: ICE gathering incomplete after {:?}, sending what was gathered",
                self.shared.id, self.gathering_timeout
            );
        }

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("Local description missing".to_string()))?;
        Ok(local.sdp)
    }

    async fn set_remote(&self, description: RTCSessionDescription) -> Result<()> {
        let sdp = description.sdp.clone();
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        match remote_media_from_sdp(&sdp) {
            Ok(media) => self.shared.merge_remote(media),
            Err(e) => warn!("Link {}: {}", self.shared.id, e),
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::PeerConnectionError(format!(
                "Link {} is closed",
                self.shared.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for WebRtcPeerLink {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn role(&self) -> PeerRole {
        self.role
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        let sdp = self.set_local_and_gather(offer).await?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.ensure_open()?;
        if offer.sdp_type != SdpType::Offer {
            return Err(Error::SdpError("Expected an offer".to_string()));
        }
        let offer = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| Error::SdpError(format!("Invalid offer: {}", e)))?;
        self.set_remote(offer).await?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        let sdp = self.set_local_and_gather(answer).await?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        if answer.sdp_type != SdpType::Answer {
            return Err(Error::SdpError("Expected an answer".to_string()));
        }
        let answer = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| Error::SdpError(format!("Invalid answer: {}", e)))?;
        self.set_remote(answer).await
    }

    async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing peer link {}", self.shared.id);
        *self.shared.state.lock() = ConnectionState::Closed;
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close: {}", e)))
    }
}

impl Drop for WebRtcPeerLink {
    fn drop(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let peer_connection = self.peer_connection.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = peer_connection.close().await {
                    debug!("Error closing dropped peer link: {}", e);
                }
            });
        }
    }
}
