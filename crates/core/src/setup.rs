//! Device-setup form
//!
//! Collects the display name and device choices before entering a call.

use crate::media::{DeviceInfo, DeviceKind, MediaConstraints, MediaDevices, TrackConstraint};
use crate::{Error, Result};
use tracing::{debug, warn};

/// Devices grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    /// Video inputs
    pub cameras: Vec<DeviceInfo>,
    /// Audio inputs
    pub microphones: Vec<DeviceInfo>,
}

impl DeviceList {
    /// Split a flat device list by kind, keeping order
    pub fn from_devices(devices: Vec<DeviceInfo>) -> Self {
        let (cameras, microphones) = devices
            .into_iter()
            .partition(|d| d.kind == DeviceKind::VideoInput);
        Self {
            cameras,
            microphones,
        }
    }
}

/// Output of a confirmed setup form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupResult {
    /// Display name shown to the remote party
    pub name: String,
    /// Constraints for local media acquisition
    pub constraints: MediaConstraints,
}

/// Setup form state
#[derive(Debug, Clone)]
pub struct SetupForm {
    name: String,
    devices: DeviceList,
    selected_camera: Option<String>,
    selected_microphone: Option<String>,
    video_enabled: bool,
    audio_enabled: bool,
}

impl SetupForm {
    /// Create a form over an already enumerated device list
    ///
    /// The first device of each kind is preselected.
    pub fn new(devices: DeviceList) -> Self {
        let selected_camera = devices.cameras.first().map(|d| d.device_id.clone());
        let selected_microphone = devices.microphones.first().map(|d| d.device_id.clone());

        Self {
            name: String::new(),
            devices,
            selected_camera,
            selected_microphone,
            video_enabled: true,
            audio_enabled: true,
        }
    }

    /// Enumerate devices and build the form
    ///
    /// Enumeration failure (e.g. permission not granted yet) is not an error:
    /// the form starts with empty device lists and system defaults.
    pub async fn load(provider: &dyn MediaDevices) -> Self {
        let devices = match provider.enumerate_devices().await {
            Ok(devices) => DeviceList::from_devices(devices),
            Err(e) => {
                warn!("Device enumeration failed, continuing with defaults: {}", e);
                DeviceList::default()
            }
        };

        debug!(
            "Setup form loaded: {} camera(s), {} microphone(s)",
            devices.cameras.len(),
            devices.microphones.len()
        );

        Self::new(devices)
    }

    /// Enumerated devices
    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    /// Current display name input
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Update the display name input
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Whether video will be requested
    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    /// Whether audio will be requested
    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    /// Toggle video capture
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
    }

    /// Toggle audio capture
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }

    /// Camera selector value; hidden (None) while video is disabled
    pub fn selected_camera(&self) -> Option<&str> {
        self.video_enabled
            .then_some(self.selected_camera.as_deref())
            .flatten()
    }

    /// Microphone selector value; hidden (None) while audio is disabled
    pub fn selected_microphone(&self) -> Option<&str> {
        self.audio_enabled
            .then_some(self.selected_microphone.as_deref())
            .flatten()
    }

    /// Select a camera by id
    pub fn select_camera(&mut self, device_id: &str) -> Result<()> {
        if !self.devices.cameras.iter().any(|d| d.device_id == device_id) {
            return Err(Error::InvalidConfig(format!("Unknown camera: {}", device_id)));
        }
        self.selected_camera = Some(device_id.to_string());
        Ok(())
    }

    /// Select a microphone by id
    pub fn select_microphone(&mut self, device_id: &str) -> Result<()> {
        if !self
            .devices
            .microphones
            .iter()
            .any(|d| d.device_id == device_id)
        {
            return Err(Error::InvalidConfig(format!(
                "Unknown microphone: {}",
                device_id
            )));
        }
        self.selected_microphone = Some(device_id.to_string());
        Ok(())
    }

    /// Whether the start button is enabled
    pub fn can_start(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// Constraints implied by the current toggles and selections
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            video: TrackConstraint::from_selection(
                self.video_enabled,
                self.selected_camera.clone(),
            ),
            audio: TrackConstraint::from_selection(
                self.audio_enabled,
                self.selected_microphone.clone(),
            ),
        }
    }

    /// Validate and produce the name/constraints pair
    pub fn confirm(&self) -> Result<SetupResult> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidConfig(
                "Display name must not be empty".to_string(),
            ));
        }

        Ok(SetupResult {
            name: name.to_string(),
            constraints: self.constraints(),
        })
    }
}
