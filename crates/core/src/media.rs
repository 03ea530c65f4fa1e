//! Local media model: devices, constraints, tracks and streams
//!
//! A [`MediaStream`] is a cheap-to-clone handle over a set of tracks. Tracks
//! are shared between the call controller (which toggles and stops them) and
//! the peer engine (which binds them to outgoing RTP senders), so their flags
//! are atomics rather than plain fields.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Microphone audio
    Audio,
    /// Camera video
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Kind of capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Microphone
    #[serde(rename = "audioinput")]
    AudioInput,
    /// Camera
    #[serde(rename = "videoinput")]
    VideoInput,
}

impl DeviceKind {
    /// Media kind produced by this device
    pub fn media_kind(self) -> MediaKind {
        match self {
            DeviceKind::AudioInput => MediaKind::Audio,
            DeviceKind::VideoInput => MediaKind::Video,
        }
    }
}

/// A capture device as reported by the device provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Opaque device identifier
    pub device_id: String,

    /// Human-readable label (may be empty before permission is granted)
    #[serde(default)]
    pub label: String,

    /// Device kind
    pub kind: DeviceKind,
}

impl DeviceInfo {
    /// Create a device description
    pub fn new(device_id: impl Into<String>, label: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            kind,
        }
    }

    /// Label to show in a selector, falling back to a generic name
    pub fn display_label(&self) -> &str {
        if !self.label.is_empty() {
            return &self.label;
        }
        match self.kind {
            DeviceKind::VideoInput => "Camera",
            DeviceKind::AudioInput => "Microphone",
        }
    }
}

/// Constraint for one media kind
///
/// Serializes as `false` when disabled and `{"deviceId": "..."}` when enabled,
/// the shape `getUserMedia` takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConstraintRepr", into = "ConstraintRepr")]
pub enum TrackConstraint {
    /// Do not request a track of this kind
    Disabled,
    /// Request a track, optionally from a specific device
    Device {
        /// Device to capture from; `None` means the system default
        device_id: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ConstraintRepr {
    Flag(bool),
    Device {
        #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
    },
}

impl From<ConstraintRepr> for TrackConstraint {
    fn from(repr: ConstraintRepr) -> Self {
        match repr {
            ConstraintRepr::Flag(false) => TrackConstraint::Disabled,
            ConstraintRepr::Flag(true) => TrackConstraint::Device { device_id: None },
            ConstraintRepr::Device { device_id } => TrackConstraint::Device {
                device_id: device_id.filter(|id| !id.is_empty()),
            },
        }
    }
}

impl From<TrackConstraint> for ConstraintRepr {
    fn from(constraint: TrackConstraint) -> Self {
        match constraint {
            TrackConstraint::Disabled => ConstraintRepr::Flag(false),
            TrackConstraint::Device { device_id } => ConstraintRepr::Device { device_id },
        }
    }
}

impl TrackConstraint {
    /// Build a constraint from a toggle and an optional device selection
    pub fn from_selection(enabled: bool, device_id: Option<String>) -> Self {
        if enabled {
            TrackConstraint::Device {
                device_id: device_id.filter(|id| !id.is_empty()),
            }
        } else {
            TrackConstraint::Disabled
        }
    }

    /// Whether a track of this kind is requested
    pub fn is_enabled(&self) -> bool {
        matches!(self, TrackConstraint::Device { .. })
    }

    /// Requested device, if any
    pub fn device_id(&self) -> Option<&str> {
        match self {
            TrackConstraint::Device { device_id } => device_id.as_deref(),
            TrackConstraint::Disabled => None,
        }
    }
}

/// Constraints passed to [`MediaDevices::get_user_media`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Camera constraint
    pub video: TrackConstraint,
    /// Microphone constraint
    pub audio: TrackConstraint,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: TrackConstraint::Device { device_id: None },
            audio: TrackConstraint::Device { device_id: None },
        }
    }
}

impl MediaConstraints {
    /// Constraint for a media kind
    pub fn for_kind(&self, kind: MediaKind) -> &TrackConstraint {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    /// True when neither audio nor video is requested
    pub fn is_empty(&self) -> bool {
        !self.video.is_enabled() && !self.audio.is_enabled()
    }
}

/// A single local or synthetic media track
pub trait MediaTrack: Send + Sync + fmt::Debug {
    /// Track identifier, unique within the process
    fn id(&self) -> &str;

    /// Media kind
    fn kind(&self) -> MediaKind;

    /// Label of the source device
    fn label(&self) -> &str;

    /// Whether the track currently produces media (muted tracks send black/silence)
    fn is_enabled(&self) -> bool;

    /// Enable or mute the track without renegotiation
    fn set_enabled(&self, enabled: bool);

    /// Whether the track has not been stopped
    fn is_live(&self) -> bool;

    /// Stop the track permanently and release the device
    fn stop(&self);
}

/// Track backed by a capture device
#[derive(Debug)]
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    label: String,
    device_id: Option<String>,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl LocalTrack {
    /// Create a live, enabled track
    pub fn new(kind: MediaKind, label: impl Into<String>, device_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            device_id,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        }
    }

    /// Device this track captures from
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }
}

impl MediaTrack for LocalTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Snapshot of one track for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    /// Track identifier
    pub id: String,
    /// Media kind
    pub kind: MediaKind,
    /// Source label
    pub label: String,
    /// Enabled flag
    pub enabled: bool,
    /// Live flag
    pub live: bool,
}

/// A set of local tracks
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MediaStream {
    /// Wrap a set of tracks
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// Stream with no tracks (audio/video-free call)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Tracks of one kind
    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Whether the stream carries any track of this kind
    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks_of(kind).next().is_some()
    }

    /// True when the stream has no tracks at all
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Whether any live track of this kind is enabled
    pub fn is_kind_enabled(&self, kind: MediaKind) -> bool {
        self.tracks_of(kind).any(|t| t.is_live() && t.is_enabled())
    }

    /// Flip the enabled flag of every track of `kind`
    ///
    /// Each track is flipped individually, so applying this twice restores
    /// every track to its original flag. Returns the number of tracks touched.
    pub fn toggle(&self, kind: MediaKind) -> usize {
        let mut touched = 0;
        for track in self.tracks_of(kind) {
            track.set_enabled(!track.is_enabled());
            touched += 1;
        }
        touched
    }

    /// Set the enabled flag of every track of `kind`
    pub fn set_kind_enabled(&self, kind: MediaKind, enabled: bool) {
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
    }

    /// Number of tracks that have not been stopped
    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Stop every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Per-track snapshot for display
    pub fn summaries(&self) -> Vec<TrackSummary> {
        self.tracks
            .iter()
            .map(|t| TrackSummary {
                id: t.id().to_string(),
                kind: t.kind(),
                label: t.label().to_string(),
                enabled: t.is_enabled(),
                live: t.is_live(),
            })
            .collect()
    }
}

/// Camera/microphone provider
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// List available capture devices
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Acquire a stream containing exactly the requested kinds
    ///
    /// A disabled kind must not produce a track at all.
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream>;
}
