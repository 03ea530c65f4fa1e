//! Socket.IO signaling client for the call relay

use super::protocol::{
    endpoint_url, ClientMessage, EnginePacket, OpenInfo, RelayMessage, SocketPacket,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use peercall_core::config::{PeerCallConfig, ReconnectionConfig};
use peercall_core::signaling::{SignalingCommand, SignalingEvent, SignalingTransport};
use peercall_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const EVENT_CAPACITY: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket joined to the relay's default namespace
struct RelaySocket {
    ws: WsStream,
    open: OpenInfo,
}

/// How a single WebSocket connection ended
enum ConnectionEnd {
    Shutdown,
    Lost(String),
}

/// State shared between the client handle and its connection task
#[derive(Default)]
struct Shared {
    /// Id from the latest `me` event
    local_id: RwLock<Option<String>>,

    /// Outgoing frame queue of the live connection
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl Shared {
    fn clear(&self) {
        *self.local_id.write() = None;
        *self.outgoing.lock() = None;
    }
}

struct Supervisor {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Socket.IO signaling client with bounded reconnection
///
/// Speaks Engine.IO v4 over the WebSocket transport: it joins the default
/// namespace, answers server heartbeats and treats a silent connection as
/// lost. One instance is meant to live for the whole application and be shared
/// behind an `Arc`. After a dropped connection it retries up to
/// `max_attempts` times, `delay_ms` apart, then reports `Disconnected`.
pub struct WsSignalingClient {
    /// Relay URL
    url: String,

    /// Retry policy after a dropped connection
    reconnection: ReconnectionConfig,

    /// Event fan-out to subscribers
    events: broadcast::Sender<SignalingEvent>,

    shared: Arc<Shared>,

    supervisor: tokio::sync::Mutex<Option<Supervisor>>,
}

impl WsSignalingClient {
    /// Create a new signaling client
    ///
    /// # Arguments
    ///
    /// * `url` - Relay URL (ws:// or wss://); a bare origin gets the
    ///   default `/socket.io/` endpoint
    /// * `reconnection` - Retry policy
    pub fn new(url: &str, reconnection: ReconnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            url: endpoint_url(url),
            reconnection,
            events,
            shared: Arc::new(Shared::default()),
            supervisor: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a client from the application configuration
    pub fn from_config(config: &PeerCallConfig) -> Self {
        Self::new(&config.signaling_url, config.reconnection)
    }

    /// WebSocket endpoint of the relay
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a connection task is running
    pub async fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }
}

#[async_trait]
impl SignalingTransport for WsSignalingClient {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<()> {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.as_ref().is_some_and(|s| !s.task.is_finished()) {
            debug!("Signaling client already connected");
            return Ok(());
        }

        info!("Connecting to signaling relay: {}", self.url);
        let socket = dial(&self.url, &self.reconnection, &self.events, false).await?;
        info!(sid = %socket.open.sid, "Connected to signaling relay");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            self.url.clone(),
            self.reconnection,
            self.events.clone(),
            self.shared.clone(),
            socket,
            shutdown_rx,
        ));

        *supervisor = Some(Supervisor {
            task,
            shutdown: shutdown_tx,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(supervisor) = self.supervisor.lock().await.take() else {
            return Ok(());
        };

        info!("Disconnecting from signaling relay");
        let _ = supervisor.shutdown.send(true);
        let abort = supervisor.task.abort_handle();
        if tokio::time::timeout(CLOSE_TIMEOUT, supervisor.task)
            .await
            .is_err()
        {
            warn!("Signaling connection did not close in time, aborting");
            abort.abort();
        }

        self.shared.clear();
        let _ = self.events.send(SignalingEvent::Disconnected {
            reason: "client disconnected".to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: SignalingCommand) -> Result<()> {
        let message = ClientMessage::from(command);
        let frame = message.to_frame()?;

        let Some(tx) = self.shared.outgoing.lock().clone() else {
            return Err(Error::SignalingError(
                "Not connected to the signaling relay".to_string(),
            ));
        };

        debug!("Sending {} frame", message.event_name());
        tx.send(Message::Text(frame))
            .map_err(|e| Error::SignalingError(format!("Failed to send message: {}", e)))
    }

    fn local_id(&self) -> Option<String> {
        self.shared.local_id.read().clone()
    }
}

/// Open a WebSocket and join the relay, retrying per the policy
///
/// A first connect retries immediately after a failure, waiting `delay`
/// between attempts. A reconnect waits `delay` before every attempt and
/// announces each one.
async fn dial(
    url: &str,
    policy: &ReconnectionConfig,
    events: &broadcast::Sender<SignalingEvent>,
    reconnecting: bool,
) -> Result<RelaySocket> {
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        if reconnecting {
            let _ = events.send(SignalingEvent::Reconnecting { attempt });
            tokio::time::sleep(policy.delay()).await;
        } else if attempt > 1 {
            tokio::time::sleep(policy.delay()).await;
        }

        match open_socket(url).await {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                warn!(
                    "Signaling connect attempt {}/{} failed: {}",
                    attempt, policy.max_attempts, e
                );
                last_error = e.to_string();
            }
        }
    }

    Err(Error::WebSocketError(format!(
        "Failed to connect to {} after {} attempt(s): {}",
        url, policy.max_attempts, last_error
    )))
}

async fn open_socket(url: &str) -> Result<RelaySocket> {
    let (mut ws, _) = connect_async(url)
        .await
        .map_err(|e| Error::WebSocketError(e.to_string()))?;

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut ws)).await {
        Ok(Ok(open)) => Ok(RelaySocket { ws, open }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::OperationTimeout(
            "Socket.IO handshake timed out".to_string(),
        )),
    }
}

/// Wait for the Engine.IO `open` packet, then join the default namespace
async fn handshake(ws: &mut WsStream) -> Result<OpenInfo> {
    let open = match next_packet(ws).await? {
        EnginePacket::Open(open) => open,
        other => {
            return Err(Error::SignalingError(format!(
                "Expected Engine.IO open packet, got {:?}",
                other
            )))
        }
    };
    debug!(sid = %open.sid, ping_interval = open.ping_interval, "Engine.IO session opened");

    send_packet(ws, &EnginePacket::Message(SocketPacket::Connect(None))).await?;

    loop {
        match next_packet(ws).await? {
            EnginePacket::Message(SocketPacket::Connect(_)) => return Ok(open),
            EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                return Err(Error::SignalingError(format!(
                    "Relay refused the connection: {}",
                    data
                )))
            }
            EnginePacket::Ping(data) => send_packet(ws, &EnginePacket::Pong(data)).await?,
            EnginePacket::Close => {
                return Err(Error::SignalingError(
                    "Relay closed the session during the handshake".to_string(),
                ))
            }
            other => debug!("Ignoring packet during handshake: {:?}", other),
        }
    }
}

async fn next_packet(ws: &mut WsStream) -> Result<EnginePacket> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(&text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::WebSocketError("closed by relay".to_string()))
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketError(e.to_string())),
        }
    }
}

async fn send_packet(ws: &mut WsStream, packet: &EnginePacket) -> Result<()> {
    ws.send(Message::Text(packet.encode()?))
        .await
        .map_err(|e| Error::WebSocketError(e.to_string()))
}

/// Connection task: runs one connection at a time and redials when it drops
async fn supervise(
    url: String,
    policy: ReconnectionConfig,
    events: broadcast::Sender<SignalingEvent>,
    shared: Arc<Shared>,
    mut socket: RelaySocket,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let _ = events.send(SignalingEvent::Connected);
        let end = run_connection(socket, &events, &shared, &mut shutdown).await;
        shared.clear();

        let reason = match end {
            ConnectionEnd::Shutdown => {
                debug!("Signaling connection task stopped");
                return;
            }
            ConnectionEnd::Lost(reason) => reason,
        };
        warn!("Signaling connection lost: {}", reason);

        let redial = tokio::select! {
            result = dial(&url, &policy, &events, true) => result,
            _ = shutdown.changed() => return,
        };

        match redial {
            Ok(next) => {
                info!(sid = %next.open.sid, "Reconnected to signaling relay");
                socket = next;
            }
            Err(e) => {
                error!("Giving up on signaling relay: {}", e);
                let _ = events.send(SignalingEvent::Disconnected {
                    reason: e.to_string(),
                });
                return;
            }
        }
    }
}

async fn run_connection(
    socket: RelaySocket,
    events: &broadcast::Sender<SignalingEvent>,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let liveness = socket.open.liveness_timeout();
    let (mut write, mut read) = socket.ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    *shared.outgoing.lock() = Some(tx);

    let silence = tokio::time::sleep(liveness);
    tokio::pin!(silence);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if let Ok(frame) = EnginePacket::Message(SocketPacket::Disconnect).encode() {
                    let _ = write.send(Message::Text(frame)).await;
                }
                if let Err(e) = write.close().await {
                    debug!("Error closing signaling socket: {}", e);
                }
                return ConnectionEnd::Shutdown;
            }
            _ = &mut silence => {
                return ConnectionEnd::Lost(format!("no heartbeat for {:?}", liveness));
            }
            Some(frame) = rx.recv() => {
                if let Err(e) = write.send(frame).await {
                    return ConnectionEnd::Lost(format!("send failed: {}", e));
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    silence.as_mut().reset(tokio::time::Instant::now() + liveness);
                    match handle_frame(&text, events, shared) {
                        FrameOutcome::Continue => {}
                        FrameOutcome::Reply(reply) => {
                            if let Err(e) = write.send(reply).await {
                                return ConnectionEnd::Lost(format!("send failed: {}", e));
                            }
                        }
                        FrameOutcome::Closed(reason) => return ConnectionEnd::Lost(reason),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return ConnectionEnd::Lost("closed by relay".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return ConnectionEnd::Lost(e.to_string()),
            },
        }
    }
}

/// What the connection loop does after a frame
enum FrameOutcome {
    Continue,
    Reply(Message),
    Closed(String),
}

fn handle_frame(
    text: &str,
    events: &broadcast::Sender<SignalingEvent>,
    shared: &Shared,
) -> FrameOutcome {
    let packet = match EnginePacket::decode(text) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("Failed to handle relay frame: {}", e);
            return FrameOutcome::Continue;
        }
    };

    match packet {
        EnginePacket::Ping(data) => match EnginePacket::Pong(data).encode() {
            Ok(frame) => FrameOutcome::Reply(Message::Text(frame)),
            Err(e) => {
                warn!("Failed to encode pong: {}", e);
                FrameOutcome::Continue
            }
        },
        EnginePacket::Close => FrameOutcome::Closed("session closed by relay".to_string()),
        EnginePacket::Message(SocketPacket::Disconnect) => {
            FrameOutcome::Closed("disconnected by relay".to_string())
        }
        EnginePacket::Message(SocketPacket::Event(args)) => {
            match RelayMessage::from_event(args) {
                Ok(Some(message)) => {
                    if let RelayMessage::Me(id) = &message {
                        info!("Relay assigned id {}", id);
                        *shared.local_id.write() = Some(id.clone());
                    }
                    let _ = events.send(message.into());
                }
                Ok(None) => debug!("Ignoring relay event: {}", text),
                Err(e) => warn!("Failed to handle relay event: {}", e),
            }
            FrameOutcome::Continue
        }
        other => {
            debug!("Ignoring relay packet: {:?}", other);
            FrameOutcome::Continue
        }
    }
}
