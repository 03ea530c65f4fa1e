//! Call session transitions
//!
//! [`CallMachine`] holds the session state and turns each input into a list of
//! [`Effect`]s for the controller to carry out. It performs no I/O, so every
//! ordering of inputs can be exercised synchronously.
//!
//! Each session (one outbound or one accepted inbound call) gets a new
//! generation number. Asynchronous completions carry the generation they were
//! started under; anything tagged with an older generation is stale.

use super::state::{CallState, Notice, RemoteParty};
use crate::peer::{ConnectionState, PeerEvent, PeerRole, RemoteMedia, SdpType, SessionDescription};
use crate::signaling::{AnswerCallParams, CallUserParams, IncomingCallParams, SignalingCommand};
use crate::{Error, Result};
use tracing::{debug, info, warn};

/// Work the controller performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open an originator link and create the offer
    OpenOutbound {
        /// Session generation
        generation: u64,
    },
    /// Open a receiver link and answer the offer
    OpenInbound {
        /// Session generation
        generation: u64,
        /// Offer received with the incoming call
        offer: SessionDescription,
    },
    /// Send a request to the relay
    Send(SignalingCommand),
    /// Hand the remote answer to the active link
    ApplyAnswer {
        /// Session generation
        generation: u64,
        /// Answer received from the callee
        answer: SessionDescription,
    },
    /// Arm the unanswered-call timer, if one is configured
    StartAnswerTimer {
        /// Session generation
        generation: u64,
    },
    /// Close the link and cancel pending work of a session
    TearDown {
        /// Generation being torn down
        generation: u64,
    },
    /// Stop every local track
    StopLocalMedia,
    /// Show a notice
    Notify(Notice),
}

/// Pure call-session state machine
#[derive(Debug)]
pub struct CallMachine {
    state: CallState,
    generation: u64,
    local_id: Option<String>,
    display_name: String,
    /// Remote media reported before the receiver's answer was ready
    early_remote: Option<RemoteMedia>,
}

impl CallMachine {
    /// Create an idle machine for the given display name
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            state: CallState::Idle,
            generation: 0,
            local_id: None,
            display_name: display_name.into(),
            early_remote: None,
        }
    }

    /// Current state
    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Current session generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Relay-assigned id
    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// Display name sent with outbound calls
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Whether a completion tagged `generation` belongs to the live session
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.state.has_peer()
    }

    /// Relay assigned (or re-assigned) our id
    pub fn set_identity(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.local_id.as_deref() != Some(id.as_str()) {
            info!("Local id assigned: {}", id);
        }
        self.local_id = Some(id);
    }

    /// Relay connection dropped; the old id is no longer routable
    pub fn clear_identity(&mut self) {
        if let Some(id) = self.local_id.take() {
            debug!("Dropping relay id {}", id);
        }
    }

    /// User places a call
    pub fn dial(&mut self, target: &str) -> Result<Vec<Effect>> {
        let target = target.trim();
        let Some(local_id) = self.local_id.as_deref() else {
            return Err(Error::NotReady(
                "No id assigned by the signaling relay yet".to_string(),
            ));
        };
        if target.is_empty() {
            return Err(Error::InvalidConfig("Target id must not be empty".to_string()));
        }
        if target == local_id {
            return Err(Error::InvalidConfig("Cannot call your own id".to_string()));
        }
        if !self.state.is_quiescent() {
            return Err(Error::InvalidState(format!(
                "Cannot start a call while {}",
                self.state.name()
            )));
        }

        let generation = self.begin_session();
        self.state = CallState::Originating {
            target: target.to_string(),
        };
        debug!("Session {} originating call to {}", generation, target);
        Ok(vec![Effect::OpenOutbound { generation }])
    }

    /// The originator link produced its offer
    pub fn offer_ready(&mut self, generation: u64, offer: SessionDescription) -> Vec<Effect> {
        if generation != self.generation {
            return Vec::new();
        }
        let CallState::Originating { target } = &self.state else {
            debug!("Offer ready outside originating state, ignoring");
            return Vec::new();
        };
        let target = target.clone();
        let Some(from) = self.local_id.clone() else {
            return self.fail("Lost relay id before the offer could be sent");
        };

        let params = CallUserParams {
            user_to_call: target.clone(),
            signal_data: offer,
            from,
            name: self.display_name.clone(),
        };
        self.state = CallState::AwaitingAnswer { target };

        vec![
            Effect::Send(SignalingCommand::CallUser(params)),
            Effect::StartAnswerTimer { generation },
        ]
    }

    /// The callee answered
    pub fn call_accepted(&mut self, answer: SessionDescription) -> Vec<Effect> {
        let CallState::AwaitingAnswer { target } = &self.state else {
            debug!(
                "Ignoring callAccepted while {} (no call awaiting an answer)",
                self.state.name()
            );
            return Vec::new();
        };
        if answer.sdp_type != SdpType::Answer {
            warn!("Ignoring callAccepted carrying a non-answer description");
            return Vec::new();
        }

        info!("Call to {} accepted", target);
        self.state = CallState::Connected {
            role: PeerRole::Originator,
            peer: RemoteParty {
                id: target.clone(),
                name: None,
            },
            remote: None,
        };
        vec![Effect::ApplyAnswer {
            generation: self.generation,
            answer,
        }]
    }

    /// Someone is calling
    pub fn incoming_call(&mut self, params: IncomingCallParams) -> Vec<Effect> {
        if !self.state.is_quiescent() {
            warn!(
                "Ignoring incoming call from {} while {}",
                params.from,
                self.state.name()
            );
            return Vec::new();
        }
        if params.signal.sdp_type != SdpType::Offer {
            warn!("Ignoring incoming call from {} without an offer", params.from);
            return Vec::new();
        }

        let caller = RemoteParty {
            id: params.from,
            name: (!params.name.is_empty()).then_some(params.name),
        };
        let notice = Notice::info(format!("{} is calling", caller.display_name()));
        info!("Incoming call from {}", caller.id);
        self.state = CallState::Ringing {
            caller,
            offer: params.signal,
        };
        vec![Effect::Notify(notice)]
    }

    /// User accepts the ringing call
    pub fn accept(&mut self) -> Result<Vec<Effect>> {
        let CallState::Ringing { caller, offer } = &self.state else {
            return Err(Error::InvalidState(format!(
                "No incoming call to accept while {}",
                self.state.name()
            )));
        };

        let caller = caller.clone();
        let offer = offer.clone();
        let generation = self.begin_session();
        debug!("Session {} accepting call from {}", generation, caller.id);
        self.state = CallState::Accepting { caller };
        Ok(vec![Effect::OpenInbound { generation, offer }])
    }

    /// User declines the ringing call; nothing is sent to the caller
    pub fn decline(&mut self) -> Result<Vec<Effect>> {
        let CallState::Ringing { caller, .. } = &self.state else {
            return Err(Error::InvalidState(format!(
                "No incoming call to decline while {}",
                self.state.name()
            )));
        };
        info!("Declined call from {}", caller.id);
        self.state = CallState::Idle;
        Ok(Vec::new())
    }

    /// The receiver link produced its answer
    pub fn answer_ready(&mut self, generation: u64, answer: SessionDescription) -> Vec<Effect> {
        if generation != self.generation {
            return Vec::new();
        }
        let CallState::Accepting { caller } = &self.state else {
            debug!("Answer ready outside accepting state, ignoring");
            return Vec::new();
        };

        let caller = caller.clone();
        let params = AnswerCallParams {
            signal: answer,
            to: caller.id.clone(),
        };
        self.state = CallState::Connected {
            role: PeerRole::Receiver,
            peer: caller,
            remote: self.early_remote.take(),
        };
        vec![Effect::Send(SignalingCommand::AnswerCall(params))]
    }

    /// An event reported by the session's link
    pub fn peer_event(&mut self, generation: u64, event: PeerEvent) -> Vec<Effect> {
        if !self.is_current(generation) {
            debug!("Dropping stale peer event from session {}", generation);
            return Vec::new();
        }

        match event {
            PeerEvent::RemoteMedia(media) => {
                match &mut self.state {
                    CallState::Connected { remote, .. } => {
                        debug!("Remote media: {} track(s)", media.tracks.len());
                        *remote = Some(media);
                    }
                    CallState::Accepting { .. } => self.early_remote = Some(media),
                    _ => debug!("Remote media before the answer was applied, ignoring"),
                }
                Vec::new()
            }
            PeerEvent::StateChanged(ConnectionState::Closed) => self.remote_closed(),
            PeerEvent::StateChanged(ConnectionState::Failed) => {
                self.fail("Peer connection failed")
            }
            PeerEvent::StateChanged(state) => {
                debug!("Peer connection state: {:?}", state);
                Vec::new()
            }
            PeerEvent::Failed(reason) => self.fail(&reason),
        }
    }

    /// Opening or negotiating the session's link failed
    pub fn negotiation_failed(&mut self, generation: u64, reason: &str) -> Vec<Effect> {
        if !self.is_current(generation) {
            return Vec::new();
        }
        self.fail(reason)
    }

    /// The unanswered-call timer fired
    pub fn answer_timeout(&mut self, generation: u64) -> Vec<Effect> {
        if generation != self.generation {
            return Vec::new();
        }
        let CallState::AwaitingAnswer { target } = &self.state else {
            return Vec::new();
        };

        let notice = Notice::warning(format!("No answer from {}", target));
        info!("Call to {} unanswered, giving up", target);
        let teardown = self.end_session(CallState::Idle);
        vec![teardown, Effect::Notify(notice)]
    }

    /// User hangs up (or cancels a pending call)
    pub fn hang_up(&mut self) -> Result<Vec<Effect>> {
        match &self.state {
            CallState::Ringing { .. } => self.decline(),
            state if state.has_peer() => {
                info!("Hanging up ({})", state.name());
                let teardown = self.end_session(CallState::Ended);
                Ok(vec![teardown, Effect::StopLocalMedia])
            }
            state => Err(Error::InvalidState(format!(
                "No call to hang up while {}",
                state.name()
            ))),
        }
    }

    /// Abort the live session with a failure notice, returning to Idle
    pub fn fail(&mut self, reason: &str) -> Vec<Effect> {
        if !self.state.has_peer() {
            return Vec::new();
        }
        warn!("Call failed while {}: {}", self.state.name(), reason);
        let teardown = self.end_session(CallState::Idle);
        vec![teardown, Effect::Notify(Notice::error(format!("Call failed: {}", reason)))]
    }

    fn remote_closed(&mut self) -> Vec<Effect> {
        let CallState::Connected { peer, .. } = &self.state else {
            return self.fail("Peer connection closed during negotiation");
        };
        let notice = Notice::info(format!("{} ended the call", peer.display_name()));
        let teardown = self.end_session(CallState::Ended);
        vec![teardown, Effect::StopLocalMedia, Effect::Notify(notice)]
    }

    fn begin_session(&mut self) -> u64 {
        self.generation += 1;
        self.early_remote = None;
        self.generation
    }

    /// Leave the live session; the generation moves on so late completions
    /// are recognised as stale.
    fn end_session(&mut self, next: CallState) -> Effect {
        let generation = self.generation;
        self.generation += 1;
        self.early_remote = None;
        self.state = next;
        Effect::TearDown { generation }
    }
}
