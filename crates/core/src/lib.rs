//! PeerCall Core - call setup and session control for two-party video calls
//!
//! This crate holds everything a front end needs to run a call, independent of
//! the concrete signaling and WebRTC stacks:
//! - [`setup::SetupForm`] - display name and device selection
//! - [`media`] - local tracks, streams and the device provider contract
//! - [`call::CallController`] - the call-session state machine on its own task
//! - [`signaling::SignalingTransport`] / [`peer::PeerEngine`] - collaborator traits
//! - [`relay::LoopbackRelay`] - an in-process relay for tests and demos
//!
//! # Example
//!
//! ```ignore
//! use peercall_core::call::{CallController, CallDeps};
//!
//! let (handle, mut notices) = CallController::start(deps, setup, config.call).await;
//! handle.call("abc123").await?;
//! ```

#![warn(clippy::all)]

pub mod call;
pub mod config;
pub mod devices;
pub mod media;
pub mod peer;
pub mod relay;
pub mod setup;
pub mod signaling;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

mod error;
pub use error::{Error, Result};

pub use call::{CallController, CallDeps, CallHandle, CallState, CallView, Notice};
pub use config::PeerCallConfig;
pub use media::{MediaConstraints, MediaDevices, MediaStream};
pub use peer::{PeerEngine, PeerLink, SessionDescription};
pub use signaling::{SignalingEvent, SignalingTransport};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
