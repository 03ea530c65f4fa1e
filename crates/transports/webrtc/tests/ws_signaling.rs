//! Socket.IO signaling client against a local relay

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use peercall_core::config::ReconnectionConfig;
use peercall_core::signaling::{
    AnswerCallParams, CallUserParams, IncomingCallParams, SignalingCommand, SignalingEvent,
    SignalingTransport,
};
use peercall_core::{Error, SessionDescription};
use peercall_webrtc::signaling::protocol::{EnginePacket, OpenInfo, SocketPacket};
use peercall_webrtc::signaling::{ClientMessage, RelayMessage};
use peercall_webrtc::WsSignalingClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};

const TIMEOUT: Duration = Duration::from_secs(5);

type RelaySide = WebSocketStream<TcpStream>;

fn quick_retry() -> ReconnectionConfig {
    ReconnectionConfig {
        max_attempts: 2,
        delay_ms: 100,
    }
}

fn open_info(ping_interval: u64, ping_timeout: u64) -> OpenInfo {
    OpenInfo {
        sid: "engine-sid".to_string(),
        upgrades: Vec::new(),
        ping_interval,
        ping_timeout,
    }
}

async fn next_event(events: &mut broadcast::Receiver<SignalingEvent>) -> SignalingEvent {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for signaling event")
        .expect("event channel closed")
}

async fn send_packet(ws: &mut RelaySide, packet: EnginePacket) {
    ws.send(Message::Text(packet.encode().unwrap())).await.unwrap();
}

async fn send_relay(ws: &mut RelaySide, message: RelayMessage) {
    ws.send(Message::Text(message.to_frame().unwrap()))
        .await
        .unwrap();
}

async fn recv_packet(ws: &mut RelaySide) -> Option<EnginePacket> {
    loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => return Some(EnginePacket::decode(&text).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Accept one client and run the Socket.IO handshake the way a relay does
///
/// Returns the socket and the request path the client dialed.
async fn accept_client(listener: &TcpListener, open: OpenInfo) -> (RelaySide, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let path = Arc::new(Mutex::new(String::new()));
    let seen = path.clone();
    let record_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        *seen.lock() = req.uri().to_string();
        Ok(resp)
    };
    let mut ws = accept_hdr_async(stream, record_path).await.unwrap();

    send_packet(&mut ws, EnginePacket::Open(open)).await;
    assert_eq!(
        recv_packet(&mut ws).await,
        Some(EnginePacket::Message(SocketPacket::Connect(None)))
    );
    send_packet(
        &mut ws,
        EnginePacket::Message(SocketPacket::Connect(Some(
            serde_json::json!({ "sid": "socket-sid" }),
        ))),
    )
    .await;

    let path = path.lock().clone();
    (ws, path)
}

/// Relay that serves a single client and routes its events back to it
async fn start_echo_relay(id: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let relay = tokio::spawn(async move {
        let (mut ws, path) = accept_client(&listener, open_info(25_000, 20_000)).await;

        // `me` only goes out once the heartbeat was answered
        send_packet(&mut ws, EnginePacket::Ping(String::new())).await;
        assert_eq!(
            recv_packet(&mut ws).await,
            Some(EnginePacket::Pong(String::new()))
        );
        send_relay(&mut ws, RelayMessage::Me(id.to_string())).await;
        send_packet(
            &mut ws,
            EnginePacket::Message(SocketPacket::event("heartbeat", serde_json::json!({}))),
        )
        .await;

        while let Some(packet) = recv_packet(&mut ws).await {
            let EnginePacket::Message(SocketPacket::Event(args)) = packet else {
                continue;
            };
            let reply = match ClientMessage::from_event(args).unwrap() {
                Some(ClientMessage::CallUser(params)) => {
                    RelayMessage::CallUser(IncomingCallParams {
                        from: params.from,
                        name: params.name,
                        signal: params.signal_data,
                    })
                }
                Some(ClientMessage::AnswerCall(params)) => RelayMessage::CallAccepted(params.signal),
                None => continue,
            };
            send_relay(&mut ws, reply).await;
        }
        path
    });

    (format!("ws://{}", addr), relay)
}

#[tokio::test]
async fn test_identity_and_routing() {
    let (url, relay) = start_echo_relay("abc123").await;
    let client = WsSignalingClient::new(&url, quick_retry());
    let mut events = client.subscribe();

    assert_ok!(client.connect().await);
    assert_eq!(next_event(&mut events).await, SignalingEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Identity("abc123".to_string())
    );
    assert_eq!(client.local_id().as_deref(), Some("abc123"));

    assert_ok!(
        client
            .send(SignalingCommand::CallUser(CallUserParams {
                user_to_call: "abc123".to_string(),
                signal_data: SessionDescription::offer("offer-sdp"),
                from: "abc123".to_string(),
                name: "Alice".to_string(),
            }))
            .await
    );

    // The unknown heartbeat event was skipped
    match next_event(&mut events).await {
        SignalingEvent::IncomingCall(params) => {
            assert_eq!(params.from, "abc123");
            assert_eq!(params.name, "Alice");
            assert_eq!(params.signal, SessionDescription::offer("offer-sdp"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_ok!(
        client
            .send(SignalingCommand::AnswerCall(AnswerCallParams {
                signal: SessionDescription::answer("answer-sdp"),
                to: "abc123".to_string(),
            }))
            .await
    );
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::CallAccepted(SessionDescription::answer("answer-sdp"))
    );

    assert_ok!(client.disconnect().await);
    assert!(matches!(
        next_event(&mut events).await,
        SignalingEvent::Disconnected { .. }
    ));
    assert!(client.local_id().is_none());

    let late = client
        .send(SignalingCommand::AnswerCall(AnswerCallParams {
            signal: SessionDescription::answer("late"),
            to: "abc123".to_string(),
        }))
        .await;
    assert!(matches!(assert_err!(late), Error::SignalingError(_)));

    let path = tokio::time::timeout(TIMEOUT, relay).await.unwrap().unwrap();
    assert_eq!(path, "/socket.io/?EIO=4&transport=websocket");
}

#[tokio::test]
async fn test_refused_namespace_join_fails_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            send_packet(&mut ws, EnginePacket::Open(open_info(25_000, 20_000))).await;
            let _ = recv_packet(&mut ws).await;
            send_packet(
                &mut ws,
                EnginePacket::Message(SocketPacket::ConnectError(
                    serde_json::json!({ "message": "Not authorized" }),
                )),
            )
            .await;
        }
    });

    let client = WsSignalingClient::new(&url, quick_retry());
    let err = assert_err!(client.connect().await);
    assert!(err.to_string().contains("Not authorized"));
    assert!(err.to_string().contains("2 attempt(s)"));
    assert!(!client.is_running().await);
}

#[tokio::test]
async fn test_reconnects_after_relay_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        for id in ["first", "second"] {
            let (mut ws, _) = accept_client(&listener, open_info(25_000, 20_000)).await;
            send_relay(&mut ws, RelayMessage::Me(id.to_string())).await;
            if id == "first" {
                send_packet(&mut ws, EnginePacket::Close).await;
            } else {
                while recv_packet(&mut ws).await.is_some() {}
            }
        }
    });

    let client = WsSignalingClient::new(&url, quick_retry());
    let mut events = client.subscribe();
    assert_ok!(client.connect().await);

    assert_eq!(next_event(&mut events).await, SignalingEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Identity("first".to_string())
    );
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(next_event(&mut events).await, SignalingEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Identity("second".to_string())
    );
    assert_eq!(client.local_id().as_deref(), Some("second"));

    assert_ok!(client.disconnect().await);
}

async fn wait_stopped(client: &WsSignalingClient) {
    for _ in 0..20 {
        if !client.is_running().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("connection task still running after giving up");
}

async fn collect_until_disconnected(
    events: &mut broadcast::Receiver<SignalingEvent>,
) -> (Vec<u32>, String) {
    let mut attempts = Vec::new();
    loop {
        match next_event(events).await {
            SignalingEvent::Reconnecting { attempt } => attempts.push(attempt),
            SignalingEvent::Disconnected { reason } => return (attempts, reason),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (mut ws, _) = accept_client(&listener, open_info(25_000, 20_000)).await;
        send_relay(&mut ws, RelayMessage::Me("only".to_string())).await;
        ws.close(None).await.unwrap();
        // Listener dropped here: every redial is refused
    });

    let client = WsSignalingClient::new(&url, quick_retry());
    let mut events = client.subscribe();
    assert_ok!(client.connect().await);

    let (attempts, reason) = collect_until_disconnected(&mut events).await;
    assert_eq!(attempts, vec![1, 2]);
    assert!(reason.contains("2 attempt(s)"));
    assert!(client.local_id().is_none());
    wait_stopped(&client).await;
}

#[tokio::test]
async fn test_silent_relay_counts_as_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (mut ws, _) = accept_client(&listener, open_info(100, 100)).await;
        drop(listener);
        send_relay(&mut ws, RelayMessage::Me("quiet".to_string())).await;
        // Keep the socket open without ever pinging
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(ws);
    });

    let client = WsSignalingClient::new(&url, quick_retry());
    let mut events = client.subscribe();
    assert_ok!(client.connect().await);
    assert_eq!(next_event(&mut events).await, SignalingEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::Identity("quiet".to_string())
    );

    let (attempts, _) = collect_until_disconnected(&mut events).await;
    assert_eq!(attempts, vec![1, 2]);
    assert!(client.local_id().is_none());
    wait_stopped(&client).await;
}
