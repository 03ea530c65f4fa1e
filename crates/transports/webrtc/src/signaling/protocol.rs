//! Relay wire protocol
//!
//! The relay is a Socket.IO server reached over its WebSocket transport.
//! Every text frame is one Engine.IO packet: a type digit followed by the
//! packet data. Socket.IO packets travel inside Engine.IO `message` packets,
//! so an event arrives as `42["<name>",<payload>]`. Payload field names are
//! camelCase.
//!
//! Only the default namespace and text packets are supported.

use peercall_core::signaling::{
    AnswerCallParams, CallUserParams, IncomingCallParams, SignalingCommand, SignalingEvent,
    EVENT_ANSWER_CALL, EVENT_CALL_ACCEPTED, EVENT_CALL_USER, EVENT_IDENTITY,
};
use peercall_core::{Error, Result, SessionDescription};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Engine.IO protocol revision spoken by this client
pub const ENGINE_IO_VERSION: u32 = 4;

/// Path a Socket.IO server listens on by default
const SOCKET_IO_PATH: &str = "/socket.io/";

/// WebSocket endpoint for a relay URL
///
/// A bare origin such as `wss://relay.example.com` gets the default
/// `/socket.io/` path. The Engine.IO query is appended unless the URL already
/// carries one.
pub fn endpoint_url(url: &str) -> String {
    if url.contains("EIO=") {
        return url.to_string();
    }

    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };
    let base = base.trim_end_matches('/');
    let authority = base.split_once("://").map_or(base, |(_, rest)| rest);
    let path = if authority.contains('/') {
        format!("{}/", base)
    } else {
        format!("{}{}", base, SOCKET_IO_PATH)
    };

    let transport = format!("EIO={}&transport=websocket", ENGINE_IO_VERSION);
    match query {
        Some(query) if !query.is_empty() => format!("{}?{}&{}", path, query, transport),
        _ => format!("{}?{}", path, transport),
    }
}

/// Engine.IO handshake data sent by the server in the `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    /// Engine.IO session id
    pub sid: String,

    /// Transports the server offers to upgrade to
    #[serde(default)]
    pub upgrades: Vec<String>,

    /// Milliseconds between server pings
    pub ping_interval: u64,

    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
}

impl OpenInfo {
    /// Silence after which the connection counts as dead
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Handshake (type 0)
    Open(OpenInfo),
    /// Transport close (type 1)
    Close,
    /// Heartbeat request (type 2)
    Ping(String),
    /// Heartbeat reply (type 3)
    Pong(String),
    /// Socket.IO payload (type 4)
    Message(SocketPacket),
    /// Transport upgrade (type 5)
    Upgrade,
    /// No-op (type 6)
    Noop,
}

impl EnginePacket {
    /// Encode as a WebSocket text frame
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            EnginePacket::Open(info) => format!("0{}", to_json(info)?),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()?),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        })
    }

    /// Decode a WebSocket text frame
    pub fn decode(frame: &str) -> Result<Self> {
        let Some(kind) = frame.chars().next() else {
            return Err(Error::SerializationError("Empty Engine.IO frame".to_string()));
        };
        let data = &frame[kind.len_utf8()..];

        match kind {
            '0' => serde_json::from_str(data).map(EnginePacket::Open).map_err(|e| {
                Error::SerializationError(format!("Invalid Engine.IO handshake: {}", e))
            }),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(data.to_string())),
            '3' => Ok(EnginePacket::Pong(data.to_string())),
            '4' => SocketPacket::decode(data).map(EnginePacket::Message),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(Error::SerializationError(format!(
                "Unknown Engine.IO packet type '{}'",
                other
            ))),
        }
    }
}

/// Socket.IO packet on the default namespace
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace join request or acknowledgement (type 0)
    Connect(Option<Value>),
    /// Namespace leave (type 1)
    Disconnect,
    /// Event: name followed by its arguments (type 2)
    Event(Vec<Value>),
    /// Acknowledgement (type 3)
    Ack(Vec<Value>),
    /// Namespace join refused (type 4)
    ConnectError(Value),
}

impl SocketPacket {
    /// Event packet with a single payload argument
    pub fn event(name: &str, payload: Value) -> Self {
        SocketPacket::Event(vec![Value::from(name), payload])
    }

    /// Encode as the data of an Engine.IO `message` packet
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", to_json(auth)?),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event(args) => format!("2{}", to_json(args)?),
            SocketPacket::Ack(args) => format!("3{}", to_json(args)?),
            SocketPacket::ConnectError(data) => format!("4{}", to_json(data)?),
        })
    }

    /// Decode the data of an Engine.IO `message` packet
    pub fn decode(data: &str) -> Result<Self> {
        let Some(kind) = data.chars().next() else {
            return Err(Error::SerializationError("Empty Socket.IO packet".to_string()));
        };
        let mut rest = &data[kind.len_utf8()..];

        if let Some(namespaced) = rest.strip_prefix('/') {
            let (namespace, tail) = namespaced.split_once(',').unwrap_or((namespaced, ""));
            if !namespace.is_empty() {
                return Err(Error::SerializationError(format!(
                    "Packet for unsupported namespace /{}",
                    namespace
                )));
            }
            rest = tail;
        }

        // Acknowledgement id, unused by this client
        let payload = rest.trim_start_matches(|c: char| c.is_ascii_digit());

        match kind {
            '0' if payload.is_empty() => Ok(SocketPacket::Connect(None)),
            '0' => from_json::<Value>("connect", payload).map(|v| SocketPacket::Connect(Some(v))),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => from_json("event", payload).map(SocketPacket::Event),
            '3' => from_json("ack", payload).map(SocketPacket::Ack),
            '4' => from_json("connect error", payload).map(SocketPacket::ConnectError),
            '5' | '6' => Err(Error::SerializationError(
                "Binary Socket.IO packets are not supported".to_string(),
            )),
            other => Err(Error::SerializationError(format!(
                "Unknown Socket.IO packet type '{}'",
                other
            ))),
        }
    }
}

/// Events sent by the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Offer a call to another client
    CallUser(CallUserParams),

    /// Answer a call
    AnswerCall(AnswerCallParams),
}

/// Events sent by the relay
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// Id assigned to this connection
    Me(String),

    /// Incoming call
    CallUser(IncomingCallParams),

    /// The callee answered
    CallAccepted(SessionDescription),
}

impl ClientMessage {
    /// Event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::CallUser(_) => EVENT_CALL_USER,
            ClientMessage::AnswerCall(_) => EVENT_ANSWER_CALL,
        }
    }

    /// Engine.IO frame carrying this event
    pub fn to_frame(&self) -> Result<String> {
        let payload = match self {
            ClientMessage::CallUser(params) => to_value(params)?,
            ClientMessage::AnswerCall(params) => to_value(params)?,
        };
        EnginePacket::Message(SocketPacket::event(self.event_name(), payload)).encode()
    }

    /// Interpret event arguments sent by a client
    ///
    /// Returns `Ok(None)` for events that are not client requests.
    pub fn from_event(args: Vec<Value>) -> Result<Option<Self>> {
        let (name, payload) = split_event(args)?;
        let message = match name.as_str() {
            EVENT_CALL_USER => ClientMessage::CallUser(from_value(&name, payload)?),
            EVENT_ANSWER_CALL => ClientMessage::AnswerCall(from_value(&name, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

impl From<SignalingCommand> for ClientMessage {
    fn from(command: SignalingCommand) -> Self {
        match command {
            SignalingCommand::CallUser(params) => ClientMessage::CallUser(params),
            SignalingCommand::AnswerCall(params) => ClientMessage::AnswerCall(params),
        }
    }
}

impl RelayMessage {
    /// Event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayMessage::Me(_) => EVENT_IDENTITY,
            RelayMessage::CallUser(_) => EVENT_CALL_USER,
            RelayMessage::CallAccepted(_) => EVENT_CALL_ACCEPTED,
        }
    }

    /// Engine.IO frame carrying this event
    pub fn to_frame(&self) -> Result<String> {
        let payload = match self {
            RelayMessage::Me(id) => Value::from(id.as_str()),
            RelayMessage::CallUser(params) => to_value(params)?,
            RelayMessage::CallAccepted(signal) => to_value(signal)?,
        };
        EnginePacket::Message(SocketPacket::event(self.event_name(), payload)).encode()
    }

    /// Interpret event arguments sent by the relay
    ///
    /// Returns `Ok(None)` for well-formed events this client does not handle.
    pub fn from_event(args: Vec<Value>) -> Result<Option<Self>> {
        let (name, payload) = split_event(args)?;
        let message = match name.as_str() {
            EVENT_IDENTITY => RelayMessage::Me(from_value(&name, payload)?),
            EVENT_CALL_USER => RelayMessage::CallUser(from_value(&name, payload)?),
            EVENT_CALL_ACCEPTED => RelayMessage::CallAccepted(from_value(&name, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

impl From<RelayMessage> for SignalingEvent {
    fn from(message: RelayMessage) -> Self {
        match message {
            RelayMessage::Me(id) => SignalingEvent::Identity(id),
            RelayMessage::CallUser(params) => SignalingEvent::IncomingCall(params),
            RelayMessage::CallAccepted(signal) => SignalingEvent::CallAccepted(signal),
        }
    }
}

fn split_event(args: Vec<Value>) -> Result<(String, Value)> {
    let mut args = args.into_iter();
    match args.next() {
        Some(Value::String(name)) => Ok((name, args.next().unwrap_or(Value::Null))),
        other => Err(Error::SerializationError(format!(
            "Event without a name: {:?}",
            other
        ))),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::SerializationError(format!("Failed to serialize relay packet: {}", e)))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::SerializationError(format!("Failed to serialize relay event: {}", e)))
}

fn from_json<T: DeserializeOwned>(what: &str, json: &str) -> Result<T> {
    serde_json::from_str(json)
        .map_err(|e| Error::SerializationError(format!("Invalid {} packet: {}", what, e)))
}

fn from_value<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| Error::SerializationError(format!("Invalid {} payload: {}", event, e)))
}
