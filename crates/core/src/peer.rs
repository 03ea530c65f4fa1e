//! Peer-connection engine contract
//!
//! A [`PeerEngine`] opens one [`PeerLink`] per call. The link produces the
//! local negotiation payload, consumes the remote one, and reports what
//! happens afterwards on the event channel it was opened with.

use crate::media::{MediaKind, MediaStream};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// SDP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer from the originator
    Offer,
    /// Answer from the receiver
    Answer,
}

/// Negotiation payload, in RTCSessionDescription JSON form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Side of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Places the call and creates the offer
    Originator,
    /// Accepts the call and creates the answer
    Receiver,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Originator => write!(f, "originator"),
            PeerRole::Receiver => write!(f, "receiver"),
        }
    }
}

/// One track received from the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    /// Track identifier chosen by the remote side
    pub id: String,
    /// Media kind
    pub kind: MediaKind,
}

/// Media received from the remote peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMedia {
    /// Remote stream identifier
    pub stream_id: String,
    /// Received tracks
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteMedia {
    /// Whether any track has arrived
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Whether a track of this kind has arrived
    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }

    /// Add a track unless one with the same id is already present
    pub fn add_track(&mut self, track: RemoteTrack) {
        if !self.tracks.iter().any(|t| t.id == track.id) {
            self.tracks.push(track);
        }
    }
}

/// Peer connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, connection not yet started
    New,
    /// Connection negotiation in progress
    Connecting,
    /// Connection established successfully
    Connected,
    /// Connection temporarily lost
    Disconnected,
    /// Connection failed
    Failed,
    /// Connection closed
    Closed,
}

/// Events emitted by a link after it is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Remote media arrived or grew (cumulative)
    RemoteMedia(RemoteMedia),
    /// Connection state changed
    StateChanged(ConnectionState),
    /// Negotiation or transport failed irrecoverably
    Failed(String),
}

/// Sender a link reports its events on
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// One peer-connection object
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Identifier of this connection instance
    fn id(&self) -> &str;

    /// Role the link was opened with
    fn role(&self) -> PeerRole;

    /// Create the local offer (originator only)
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a remote offer and create the local answer (receiver only)
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    /// Apply the remote answer (originator only)
    async fn apply_answer(&self, answer: SessionDescription) -> Result<()>;

    /// Tear the connection down; no events are emitted afterwards
    async fn close(&self) -> Result<()>;
}

/// Factory for peer-connection objects
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Open a link bound to the local stream
    async fn open(
        &self,
        role: PeerRole,
        local: &MediaStream,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>>;
}
