//! ICE configuration derived from the application config

use peercall_core::config::PeerCallConfig;
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Peer-connection settings shared by every link an engine opens
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// STUN and TURN servers
    pub ice_servers: Vec<RTCIceServer>,

    /// Upper bound on waiting for ICE gathering before sending a description
    pub gathering_timeout: Duration,
}

impl EngineConfig {
    /// Build from the application configuration
    pub fn from_config(config: &PeerCallConfig) -> Self {
        Self {
            ice_servers: ice_servers(config),
            gathering_timeout: Duration::from_secs(config.call.ice_gathering_timeout_secs),
        }
    }

    /// Host candidates only, for links on the same machine
    pub fn local_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            gathering_timeout: Duration::from_secs(5),
        }
    }

    pub(crate) fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        }
    }
}

/// Map STUN URLs and TURN entries to ICE servers, STUN first
pub fn ice_servers(config: &PeerCallConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect()
}
