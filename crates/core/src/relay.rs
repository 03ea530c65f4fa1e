//! In-process signaling relay
//!
//! [`LoopbackRelay`] mirrors what the hosted relay does for this protocol:
//! assign each connecting client an id, forward `callUser` to the callee as
//! an incoming call, and forward `answerCall` to the caller as `callAccepted`.
//! Messages addressed to an unknown id are dropped, as the hosted relay does.

use crate::signaling::{IncomingCallParams, SignalingCommand, SignalingEvent, SignalingTransport};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

#[derive(Default)]
struct RelayInner {
    clients: HashMap<String, broadcast::Sender<SignalingEvent>>,
}

/// Shared in-process relay
#[derive(Clone, Default)]
pub struct LoopbackRelay {
    inner: Arc<Mutex<RelayInner>>,
}

impl LoopbackRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// New client that receives a random id on connect
    pub fn client(&self) -> LoopbackSignaling {
        LoopbackSignaling::new(self.inner.clone(), None)
    }

    /// New client that always receives `id` on connect
    pub fn client_with_id(&self, id: impl Into<String>) -> LoopbackSignaling {
        LoopbackSignaling::new(self.inner.clone(), Some(id.into()))
    }

    /// Ids of connected clients
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop a client from the relay side, as if its connection was lost
    pub fn drop_client(&self, id: &str, reason: &str) -> bool {
        let Some(events) = self.inner.lock().clients.remove(id) else {
            return false;
        };
        info!("Relay dropped client {}: {}", id, reason);
        let _ = events.send(SignalingEvent::Disconnected {
            reason: reason.to_string(),
        });
        true
    }

    fn route(inner: &Mutex<RelayInner>, to: &str, event: SignalingEvent) {
        let target = inner.lock().clients.get(to).cloned();
        match target {
            Some(events) => {
                debug!("Relay forwarding {} to {}", event.name(), to);
                let _ = events.send(event);
            }
            None => debug!("Relay dropping {} for unknown client {}", event.name(), to),
        }
    }
}

/// One client connection to a [`LoopbackRelay`]
pub struct LoopbackSignaling {
    relay: Arc<Mutex<RelayInner>>,
    events: broadcast::Sender<SignalingEvent>,
    fixed_id: Option<String>,
    id: Mutex<Option<String>>,
}

impl LoopbackSignaling {
    fn new(relay: Arc<Mutex<RelayInner>>, fixed_id: Option<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            relay,
            events,
            fixed_id,
            id: Mutex::new(None),
        }
    }

    fn require_id(&self) -> Result<String> {
        let id = self.id.lock().clone();
        let Some(id) = id else {
            return Err(Error::SignalingError("Not connected to the relay".to_string()));
        };
        if !self.relay.lock().clients.contains_key(&id) {
            *self.id.lock() = None;
            return Err(Error::SignalingError("Connection to the relay was lost".to_string()));
        }
        Ok(id)
    }
}

#[async_trait]
impl SignalingTransport for LoopbackSignaling {
    async fn connect(&self) -> Result<()> {
        if self.require_id().is_ok() {
            return Ok(());
        }

        let id = self
            .fixed_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        {
            let mut relay = self.relay.lock();
            if relay.clients.contains_key(&id) {
                return Err(Error::SignalingError(format!("Id already in use: {}", id)));
            }
            relay.clients.insert(id.clone(), self.events.clone());
        }
        *self.id.lock() = Some(id.clone());

        info!("Loopback client connected as {}", id);
        let _ = self.events.send(SignalingEvent::Connected);
        let _ = self.events.send(SignalingEvent::Identity(id));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(id) = self.id.lock().take() else {
            return Ok(());
        };
        self.relay.lock().clients.remove(&id);
        let _ = self.events.send(SignalingEvent::Disconnected {
            reason: "client disconnected".to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: SignalingCommand) -> Result<()> {
        self.require_id()?;
        match command {
            SignalingCommand::CallUser(params) => LoopbackRelay::route(
                &self.relay,
                &params.user_to_call,
                SignalingEvent::IncomingCall(IncomingCallParams {
                    from: params.from,
                    name: params.name,
                    signal: params.signal_data,
                }),
            ),
            SignalingCommand::AnswerCall(params) => LoopbackRelay::route(
                &self.relay,
                &params.to,
                SignalingEvent::CallAccepted(params.signal),
            ),
        }
        Ok(())
    }

    fn local_id(&self) -> Option<String> {
        self.id.lock().clone()
    }
}
