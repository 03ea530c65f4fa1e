//! WebRTC transport for peercall
//!
//! Provides the two network-facing halves of a call:
//!
//! - [`WsSignalingClient`]: Socket.IO client for the call relay over
//!   WebSocket, with bounded reconnection
//! - [`WebRtcEngine`]: opens webrtc-rs peer connections that publish the
//!   local camera and microphone and report remote media
//!
//! # Example
//!
//! ```no_run
//! use peercall_core::config::PeerCallConfig;
//! use peercall_webrtc::{WebRtcEngine, WsSignalingClient};
//!
//! # fn example() -> peercall_core::Result<()> {
//! let config = PeerCallConfig::default();
//! let _signaling = WsSignalingClient::from_config(&config);
//! let _engine = WebRtcEngine::from_config(&config)?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod peer;
pub mod signaling;

pub use config::{ice_servers, EngineConfig};
pub use peer::{WebRtcEngine, WebRtcPeerLink};
pub use signaling::WsSignalingClient;
