//! Capture devices of this machine
//!
//! Microphones come from the default cpal host, cameras from nokhwa's native
//! backend. Both listings block, so they run on the blocking pool.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use nokhwa::utils::ApiBackend;
use peercall_core::devices::CatalogDevices;
use peercall_core::media::{DeviceInfo, DeviceKind, MediaConstraints, MediaDevices, MediaStream};
use peercall_core::{Error, Result};
use tracing::{debug, info, warn};

/// Device provider that queries the operating system
///
/// If neither backend can be queried, the configured catalog is served
/// instead so the call flow can still proceed with system defaults.
#[derive(Debug, Clone, Default)]
pub struct SystemDevices {
    fallback: CatalogDevices,
}

impl SystemDevices {
    pub fn new(fallback: CatalogDevices) -> Self {
        Self { fallback }
    }
}

/// Audio input devices on the default host, system default first
fn list_microphones() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let inputs = host
        .input_devices()
        .map_err(|e| Error::DeviceEnumeration(format!("{:?} host: {}", host.id(), e)))?;

    let mut devices = Vec::new();
    for (index, device) in inputs.enumerate() {
        let name = match device.name() {
            Ok(name) => name,
            Err(e) => {
                debug!("Skipping unnamed input device {}: {}", index, e);
                continue;
            }
        };
        let info = DeviceInfo::new(name.clone(), name.clone(), DeviceKind::AudioInput);
        if default_name.as_deref() == Some(name.as_str()) {
            devices.insert(0, info);
        } else {
            devices.push(info);
        }
    }

    debug!("Found {} microphone(s) on {:?}", devices.len(), host.id());
    Ok(devices)
}

fn list_cameras() -> Result<Vec<DeviceInfo>> {
    let cameras = nokhwa::query(ApiBackend::Auto)
        .map_err(|e| Error::DeviceEnumeration(format!("camera query failed: {}", e)))?;

    let devices: Vec<DeviceInfo> = cameras
        .iter()
        .map(|camera| {
            DeviceInfo::new(
                camera.index().to_string(),
                camera.human_name(),
                DeviceKind::VideoInput,
            )
        })
        .collect();

    debug!("Found {} camera(s)", devices.len());
    Ok(devices)
}

/// Merge the per-backend listings, cameras first
fn combine(
    cameras: Result<Vec<DeviceInfo>>,
    microphones: Result<Vec<DeviceInfo>>,
    fallback: &CatalogDevices,
) -> Result<Vec<DeviceInfo>> {
    match (cameras, microphones) {
        (Ok(mut cameras), Ok(microphones)) => {
            cameras.extend(microphones);
            Ok(cameras)
        }
        (Ok(found), Err(e)) | (Err(e), Ok(found)) => {
            warn!("Device enumeration incomplete: {}", e);
            Ok(found)
        }
        (Err(camera_err), Err(audio_err)) => {
            if fallback.devices().is_empty() {
                return Err(Error::DeviceEnumeration(format!(
                    "{}; {}",
                    camera_err, audio_err
                )));
            }
            warn!(
                "No device backend available ({}; {}), using configured devices",
                camera_err, audio_err
            );
            Ok(fallback.devices().to_vec())
        }
    }
}

#[async_trait]
impl MediaDevices for SystemDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        let (cameras, microphones) =
            tokio::task::spawn_blocking(|| (list_cameras(), list_microphones()))
                .await
                .map_err(|e| {
                    Error::DeviceEnumeration(format!("enumeration task failed: {}", e))
                })?;

        let devices = combine(cameras, microphones, &self.fallback)?;
        info!("Enumerated {} capture device(s)", devices.len());
        Ok(devices)
    }

    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        if constraints.is_empty() {
            return CatalogDevices::default().get_user_media(constraints).await;
        }
        let devices = self.enumerate_devices().await?;
        CatalogDevices::new(devices).get_user_media(constraints).await
    }
}
