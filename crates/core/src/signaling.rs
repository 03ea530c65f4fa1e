//! Signaling messages and the transport contract
//!
//! The relay only forwards two kinds of request (place a call, answer a call)
//! and delivers three kinds of event (identity, incoming call, call accepted).
//! Negotiation payloads pass through verbatim.

use crate::peer::SessionDescription;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event name: relay assigns this client's id
pub const EVENT_IDENTITY: &str = "me";
/// Event name: place a call (outbound) / incoming call (inbound)
pub const EVENT_CALL_USER: &str = "callUser";
/// Event name: answer a call (outbound)
pub const EVENT_ANSWER_CALL: &str = "answerCall";
/// Event name: the callee answered (inbound)
pub const EVENT_CALL_ACCEPTED: &str = "callAccepted";

/// Payload of an outbound call request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUserParams {
    /// Relay id of the callee
    pub user_to_call: String,
    /// Local offer
    pub signal_data: SessionDescription,
    /// Relay id of the caller, so the callee can address its answer
    pub from: String,
    /// Caller display name
    pub name: String,
}

/// Payload of an inbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCallParams {
    /// Relay id of the caller
    pub from: String,
    /// Caller display name
    #[serde(default)]
    pub name: String,
    /// Caller's offer
    pub signal: SessionDescription,
}

/// Payload of an outbound answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerCallParams {
    /// Local answer
    pub signal: SessionDescription,
    /// Relay id of the caller
    pub to: String,
}

/// Events delivered by a signaling transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Connection to the relay is up
    Connected,
    /// Relay assigned this client an id
    Identity(String),
    /// Someone is calling
    IncomingCall(IncomingCallParams),
    /// The callee answered our offer
    CallAccepted(SessionDescription),
    /// Connection dropped; reconnect attempt in progress
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Connection is down and will not be retried
    Disconnected {
        /// Human-readable reason
        reason: String,
    },
}

impl SignalingEvent {
    /// Event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Identity(_) => EVENT_IDENTITY,
            Self::IncomingCall(_) => EVENT_CALL_USER,
            Self::CallAccepted(_) => EVENT_CALL_ACCEPTED,
            Self::Reconnecting { .. } => "reconnecting",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

/// Requests sent through a signaling transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingCommand {
    /// Offer a call to another client
    CallUser(CallUserParams),
    /// Answer a call from another client
    AnswerCall(AnswerCallParams),
}

impl SignalingCommand {
    /// Event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::CallUser(_) => EVENT_CALL_USER,
            Self::AnswerCall(_) => EVENT_ANSWER_CALL,
        }
    }
}

/// Connection to a signaling relay
///
/// Implementations are constructed explicitly and shared behind an `Arc`; one
/// connection is reused across calls. Subscribers receive every event sent
/// after they subscribe; dropping the receiver unsubscribes.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open the connection (idempotent while connected)
    async fn connect(&self) -> Result<()>;

    /// Close the connection and stop reconnecting
    async fn disconnect(&self) -> Result<()>;

    /// Subscribe to events
    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent>;

    /// Send a request to the relay
    async fn send(&self, command: SignalingCommand) -> Result<()>;

    /// Id assigned by the relay, once known
    fn local_id(&self) -> Option<String>;
}
