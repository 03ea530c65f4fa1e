//! Peer engine backed by webrtc-rs

use super::connection::WebRtcPeerLink;
use crate::config::EngineConfig;
use async_trait::async_trait;
use peercall_core::config::PeerCallConfig;
use peercall_core::media::MediaStream;
use peercall_core::peer::{PeerEngine, PeerEventSender, PeerLink, PeerRole};
use peercall_core::{Error, Result};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;

/// Opens [`WebRtcPeerLink`]s from one shared webrtc-rs API object
pub struct WebRtcEngine {
    api: API,
    config: EngineConfig,
}

impl WebRtcEngine {
    /// Create an engine with the default codecs and interceptors
    pub fn new(config: EngineConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            Error::WebRtcError(format!("Failed to register codecs: {}", e))
        })?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config })
    }

    /// Create an engine from the application configuration
    pub fn from_config(config: &PeerCallConfig) -> Result<Self> {
        Self::new(EngineConfig::from_config(config))
    }

    /// Settings applied to every link
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    async fn open(
        &self,
        role: PeerRole,
        local: &MediaStream,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        let link = WebRtcPeerLink::open(
            &self.api,
            self.config.rtc_configuration(),
            role,
            local,
            events,
            self.config.gathering_timeout,
        )
        .await?;
        Ok(Arc::new(link))
    }
}
