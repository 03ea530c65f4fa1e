//! Call session state and the snapshot published to the front end

use crate::media::TrackSummary;
use crate::peer::{PeerRole, RemoteMedia, SessionDescription};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The other side of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParty {
    /// Relay id
    pub id: String,
    /// Display name, when the relay told us
    pub name: Option<String>,
}

impl RemoteParty {
    /// Name to show, falling back to the relay id
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.id)
    }
}

/// State of the single call session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Outbound peer created, waiting for the local offer
    Originating {
        /// Relay id being called
        target: String,
    },
    /// Offer sent, waiting for the callee to answer
    AwaitingAnswer {
        /// Relay id being called
        target: String,
    },
    /// Incoming call held until the user acts
    Ringing {
        /// Caller
        caller: RemoteParty,
        /// Caller's offer
        offer: SessionDescription,
    },
    /// User accepted; inbound peer is producing the answer
    Accepting {
        /// Caller
        caller: RemoteParty,
    },
    /// Handshake finished
    Connected {
        /// Our side of the handshake
        role: PeerRole,
        /// The other party
        peer: RemoteParty,
        /// Remote media, once the peer connection reports it
        remote: Option<RemoteMedia>,
    },
    /// User hung up or the remote closed the connection
    Ended,
}

impl CallState {
    /// Short state name
    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Originating { .. } => "originating",
            CallState::AwaitingAnswer { .. } => "awaiting-answer",
            CallState::Ringing { .. } => "ringing",
            CallState::Accepting { .. } => "accepting",
            CallState::Connected { .. } => "connected",
            CallState::Ended => "ended",
        }
    }

    /// No call is in progress or pending a decision
    pub fn is_quiescent(&self) -> bool {
        matches!(self, CallState::Idle | CallState::Ended)
    }

    /// A peer-connection object exists (or is being created) for this state
    pub fn has_peer(&self) -> bool {
        matches!(
            self,
            CallState::Originating { .. }
                | CallState::AwaitingAnswer { .. }
                | CallState::Accepting { .. }
                | CallState::Connected { .. }
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Originating { target } | CallState::AwaitingAnswer { target } => {
                write!(f, "{} ({})", self.name(), target)
            }
            CallState::Ringing { caller, .. } | CallState::Accepting { caller } => {
                write!(f, "{} ({})", self.name(), caller.display_name())
            }
            CallState::Connected { peer, .. } => {
                write!(f, "{} ({})", self.name(), peer.display_name())
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Signaling connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingStatus {
    /// Connecting for the first time
    Connecting,
    /// Connected to the relay
    Online,
    /// Connection dropped, retrying
    Reconnecting,
    /// Connection down for good
    Offline,
}

/// Severity of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Informational (incoming call, remote hung up)
    Info,
    /// Something degraded but the flow continues
    Warning,
    /// An operation failed
    Error,
}

/// Non-blocking user notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Severity
    pub level: NoticeLevel,
    /// Text to show
    pub message: String,
}

impl Notice {
    /// Informational notice
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    /// Warning notice
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    /// Error notice
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        write!(f, "[{}] {}", tag, self.message)
    }
}

/// Everything the call screen renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallView {
    /// Our display name
    pub display_name: String,
    /// Relay-assigned id, once known
    pub local_id: Option<String>,
    /// Relay connection status
    pub signaling: SignalingStatus,
    /// Call session state
    pub state: CallState,
    /// Camera button state
    pub camera_on: bool,
    /// Microphone button state
    pub mic_on: bool,
    /// Local self-view
    pub local_tracks: Vec<TrackSummary>,
}

impl CallView {
    /// Whether a new outbound call can be placed
    pub fn can_call(&self) -> bool {
        self.local_id.is_some() && self.state.is_quiescent()
    }

    /// Remote media shown on the remote surface
    pub fn remote_media(&self) -> Option<&RemoteMedia> {
        match &self.state {
            CallState::Connected { remote, .. } => remote.as_ref(),
            _ => None,
        }
    }

    /// Caller waiting for a decision
    pub fn incoming_caller(&self) -> Option<&RemoteParty> {
        match &self.state {
            CallState::Ringing { caller, .. } => Some(caller),
            _ => None,
        }
    }

    /// Number of local tracks that have not been stopped
    pub fn live_local_tracks(&self) -> usize {
        self.local_tracks.iter().filter(|t| t.live).count()
    }
}
