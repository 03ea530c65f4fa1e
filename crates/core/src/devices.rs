//! Device provider backed by a fixed catalog
//!
//! Serves a known device list and hands out [`LocalTrack`]s on acquisition.
//! Front ends use it as the fallback when the OS cannot be queried, and to
//! resolve constraints against a freshly enumerated list. Capture itself is
//! outside this crate; the tracks carry the enabled/live state that the call
//! screen and peer engine act on.

use crate::media::{
    DeviceInfo, DeviceKind, LocalTrack, MediaConstraints, MediaDevices, MediaKind, MediaStream,
    MediaTrack, TrackConstraint,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Device provider serving a configured catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogDevices {
    devices: Vec<DeviceInfo>,
}

impl CatalogDevices {
    /// Create a provider for the given devices
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self { devices }
    }

    /// Devices in the catalog
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    fn resolve(&self, kind: DeviceKind, constraint: &TrackConstraint) -> Result<Option<DeviceInfo>> {
        let TrackConstraint::Device { device_id } = constraint else {
            return Ok(None);
        };

        let mut candidates = self.devices.iter().filter(|d| d.kind == kind);
        let device = match device_id {
            Some(id) => candidates.find(|d| &d.device_id == id).ok_or_else(|| {
                Error::MediaAcquisition(format!("Requested {:?} device not found: {}", kind, id))
            })?,
            None => candidates.next().ok_or_else(|| {
                Error::MediaAcquisition(format!("No {:?} device available", kind))
            })?,
        };

        Ok(Some(device.clone()))
    }
}

#[async_trait]
impl MediaDevices for CatalogDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        debug!("Enumerating {} catalog devices", self.devices.len());
        Ok(self.devices.clone())
    }

    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        let camera = self.resolve(DeviceKind::VideoInput, &constraints.video)?;
        let microphone = self.resolve(DeviceKind::AudioInput, &constraints.audio)?;

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if let Some(device) = camera {
            tracks.push(Arc::new(LocalTrack::new(
                MediaKind::Video,
                device.display_label(),
                Some(device.device_id.clone()),
            )));
        }
        if let Some(device) = microphone {
            tracks.push(Arc::new(LocalTrack::new(
                MediaKind::Audio,
                device.display_label(),
                Some(device.device_id.clone()),
            )));
        }

        info!("Acquired local media with {} track(s)", tracks.len());
        Ok(MediaStream::new(tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> CatalogDevices {
        CatalogDevices::new(vec![
            DeviceInfo::new("cam-1", "Front", DeviceKind::VideoInput),
            DeviceInfo::new("cam-2", "Back", DeviceKind::VideoInput),
            DeviceInfo::new("mic-1", "", DeviceKind::AudioInput),
        ])
    }

    #[tokio::test]
    async fn test_both_disabled_yields_no_tracks() {
        let constraints = MediaConstraints {
            video: TrackConstraint::Disabled,
            audio: TrackConstraint::Disabled,
        };
        let stream = catalog().get_user_media(&constraints).await.unwrap();
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_kind_is_omitted() {
        let constraints = MediaConstraints {
            video: TrackConstraint::Disabled,
            audio: TrackConstraint::Device { device_id: None },
        };
        let stream = catalog().get_user_media(&constraints).await.unwrap();
        assert!(!stream.has_kind(MediaKind::Video));
        assert!(stream.has_kind(MediaKind::Audio));
        assert_eq!(stream.tracks()[0].label(), "Microphone");
    }

    #[tokio::test]
    async fn test_specific_device_selected() {
        let constraints = MediaConstraints {
            video: TrackConstraint::Device {
                device_id: Some("cam-2".to_string()),
            },
            audio: TrackConstraint::Disabled,
        };
        let stream = catalog().get_user_media(&constraints).await.unwrap();
        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(stream.tracks()[0].label(), "Back");
    }

    #[tokio::test]
    async fn test_unknown_device_fails() {
        let constraints = MediaConstraints {
            video: TrackConstraint::Device {
                device_id: Some("nope".to_string()),
            },
            audio: TrackConstraint::Disabled,
        };
        let err = catalog().get_user_media(&constraints).await.unwrap_err();
        assert!(matches!(err, Error::MediaAcquisition(_)));
    }

    #[tokio::test]
    async fn test_missing_kind_fails() {
        let devices = CatalogDevices::new(vec![DeviceInfo::new(
            "mic-1",
            "Mic",
            DeviceKind::AudioInput,
        )]);
        let err = devices
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MediaAcquisition(_)));
    }
}
