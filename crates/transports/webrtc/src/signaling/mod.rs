//! Signaling protocol and client for the call relay
//!
//! The relay is a Socket.IO server: it assigns each client an id (`me`),
//! forwards offers to callees (`callUser`) and answers back to callers
//! (`callAccepted`).

pub mod client;
pub mod protocol;

pub use client::WsSignalingClient;
pub use protocol::{endpoint_url, ClientMessage, RelayMessage};
