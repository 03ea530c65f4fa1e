//! Configuration types for peer calling

use crate::media::{DeviceInfo, DeviceKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Public relay the browser client talked to
pub const DEFAULT_SIGNALING_URL: &str = "wss://videocall-metl.onrender.com";

/// Main configuration for a calling client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerCallConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Signaling reconnection policy
    pub reconnection: ReconnectionConfig,

    /// Call handshake options
    pub call: CallOptions,

    /// Devices offered when the OS cannot be queried
    pub devices: Vec<DeviceInfo>,

    /// Default log filter when RUST_LOG is not set
    pub log_level: String,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Bounded reconnection policy for the signaling connection
///
/// The relay connection is retried a fixed number of times with a fixed delay
/// between attempts; there is no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Maximum connection attempts after a drop (default: 5, range: 1-20)
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds (default: 1000, range: 100-60000)
    pub delay_ms: u64,
}

/// Call handshake options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    /// Give up on an unanswered outbound call after this many seconds.
    /// `None` waits forever.
    pub answer_timeout_secs: Option<u64>,

    /// Maximum time to wait for ICE gathering before sending a description
    pub ice_gathering_timeout_secs: u64,
}

impl Default for PeerCallConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            reconnection: ReconnectionConfig::default(),
            call: CallOptions::default(),
            devices: vec![
                DeviceInfo::new("default-camera", "Default camera", DeviceKind::VideoInput),
                DeviceInfo::new(
                    "default-microphone",
                    "Default microphone",
                    DeviceKind::AudioInput,
                ),
            ],
            log_level: "info".to_string(),
        }
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1000,
        }
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            answer_timeout_secs: None,
            ice_gathering_timeout_secs: 10,
        }
    }
}

impl ReconnectionConfig {
    /// Delay between attempts
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

impl PeerCallConfig {
    /// Load configuration from a YAML file
    ///
    /// Missing fields take their default values. The result is validated.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text).map_err(|e| {
            Error::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `stun_servers` is empty or contains a non-STUN URL
    /// - a TURN server URL does not start with turn: or turns:
    /// - `reconnection.max_attempts` is not in range 1-20
    /// - `reconnection.delay_ms` is not in range 100-60000
    /// - `call.answer_timeout_secs` is zero
    /// - `call.ice_gathering_timeout_secs` is zero
    pub fn validate(&self) -> Result<()> {
        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun: or stuns:, got {}",
                bad
            )));
        }

        if let Some(bad) = self
            .turn_servers
            .iter()
            .find(|t| !t.url.starts_with("turn:") && !t.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server must start with turn: or turns:, got {}",
                bad.url
            )));
        }

        if self.reconnection.max_attempts == 0 || self.reconnection.max_attempts > 20 {
            return Err(Error::InvalidConfig(format!(
                "reconnection.max_attempts must be in range 1-20, got {}",
                self.reconnection.max_attempts
            )));
        }

        if self.reconnection.delay_ms < 100 || self.reconnection.delay_ms > 60_000 {
            return Err(Error::InvalidConfig(format!(
                "reconnection.delay_ms must be in range 100-60000, got {}",
                self.reconnection.delay_ms
            )));
        }

        if self.call.answer_timeout_secs == Some(0) {
            return Err(Error::InvalidConfig(
                "call.answer_timeout_secs must be positive when set".to_string(),
            ));
        }

        if self.call.ice_gathering_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "call.ice_gathering_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
