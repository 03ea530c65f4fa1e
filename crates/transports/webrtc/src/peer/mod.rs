//! WebRTC peer links

pub mod connection;
pub mod engine;
pub mod sdp;

pub use connection::WebRtcPeerLink;
pub use engine::WebRtcEngine;
pub use sdp::remote_media_from_sdp;
