//! Call controller task
//!
//! One tokio task owns the [`CallMachine`], the local media stream and the
//! active peer link. User commands, signaling events and completions of spawned
//! work all arrive on channels polled by a single `select!` loop, so every
//! transition runs in order on that task. The front end talks to it through a
//! cloneable [`CallHandle`] and observes it through a `watch` channel.

use super::machine::{CallMachine, Effect};
use super::state::{CallView, Notice, SignalingStatus};
use crate::config::CallOptions;
use crate::media::{MediaConstraints, MediaDevices, MediaKind, MediaStream};
use crate::peer::{PeerEngine, PeerEvent, PeerLink, PeerRole, SessionDescription};
use crate::setup::SetupResult;
use crate::signaling::{SignalingEvent, SignalingTransport};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Collaborators injected into the controller
#[derive(Clone)]
pub struct CallDeps {
    /// Shared signaling connection
    pub signaling: Arc<dyn SignalingTransport>,
    /// Peer-connection factory
    pub engine: Arc<dyn PeerEngine>,
    /// Camera/microphone provider
    pub devices: Arc<dyn MediaDevices>,
}

enum Command {
    Dial {
        target: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Accept {
        reply: oneshot::Sender<Result<()>>,
    },
    Decline {
        reply: oneshot::Sender<Result<()>>,
    },
    HangUp {
        reply: oneshot::Sender<Result<()>>,
    },
    Toggle {
        kind: MediaKind,
        reply: oneshot::Sender<bool>,
    },
    ReacquireMedia {
        constraints: MediaConstraints,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Completions of work spawned by the controller
enum Completion {
    SignalingConnected(Result<()>),
    LinkOpened {
        generation: u64,
        link: Arc<dyn PeerLink>,
        payload: SessionDescription,
        events: mpsc::UnboundedReceiver<PeerEvent>,
    },
    LinkFailed {
        generation: u64,
        error: Error,
    },
    Peer {
        generation: u64,
        event: PeerEvent,
    },
    AnswerTimeout {
        generation: u64,
    },
}

struct ActiveLink {
    generation: u64,
    link: Arc<dyn PeerLink>,
    forwarder: JoinHandle<()>,
}

/// Entry point for starting a call controller
pub struct CallController;

impl CallController {
    /// Acquire local media, connect signaling and spawn the controller task
    ///
    /// Media acquisition failure is reported as a notice and the controller
    /// continues with an empty stream. Returns the command handle and the
    /// notice stream.
    #[instrument(skip(deps, setup, options), fields(name = %setup.name))]
    pub async fn start(
        deps: CallDeps,
        setup: SetupResult,
        options: CallOptions,
    ) -> (CallHandle, mpsc::UnboundedReceiver<Notice>) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let local = match deps.devices.get_user_media(&setup.constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Local media acquisition failed: {}", e);
                let _ = notice_tx.send(Notice::error(format!(
                    "Could not access camera/microphone: {}",
                    e
                )));
                MediaStream::empty()
            }
        };

        let signaling_rx = deps.signaling.subscribe();
        let mut machine = CallMachine::new(setup.name);
        if let Some(id) = deps.signaling.local_id() {
            machine.set_identity(id);
        }
        let signaling_status = if machine.local_id().is_some() {
            SignalingStatus::Online
        } else {
            SignalingStatus::Connecting
        };

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let camera_on = local.is_kind_enabled(MediaKind::Video);
        let mic_on = local.is_kind_enabled(MediaKind::Audio);
        let (view_tx, view_rx) = watch::channel(CallView {
            display_name: machine.display_name().to_string(),
            local_id: machine.local_id().map(str::to_string),
            signaling: signaling_status,
            state: machine.state().clone(),
            camera_on,
            mic_on,
            local_tracks: local.summaries(),
        });

        let actor = CallActor {
            camera_on,
            mic_on,
            machine,
            deps,
            options,
            local,
            signaling_status,
            active: None,
            pending_open: None,
            answer_timer: None,
            completions: completion_tx,
            notices: notice_tx,
            view: view_tx,
        };

        actor.spawn_connect();
        tokio::spawn(actor.run(command_rx, signaling_rx, completion_rx));

        let handle = CallHandle {
            commands: command_tx,
            view: view_rx,
        };
        (handle, notice_rx)
    }
}

/// Cloneable handle to a running controller
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<CallView>,
}

impl CallHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| Error::ChannelClosed("Call controller has stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::ChannelClosed("Call controller dropped the request".to_string()))
    }

    /// Call the client with the given relay id
    pub async fn call(&self, target: impl Into<String>) -> Result<()> {
        let target = target.into();
        self.request(|reply| Command::Dial { target, reply }).await?
    }

    /// Accept the ringing call
    pub async fn accept(&self) -> Result<()> {
        self.request(|reply| Command::Accept { reply }).await?
    }

    /// Decline the ringing call
    pub async fn decline(&self) -> Result<()> {
        self.request(|reply| Command::Decline { reply }).await?
    }

    /// Hang up or cancel the current call
    pub async fn hang_up(&self) -> Result<()> {
        self.request(|reply| Command::HangUp { reply }).await?
    }

    /// Toggle every camera track; returns the new camera flag
    pub async fn toggle_camera(&self) -> Result<bool> {
        self.request(|reply| Command::Toggle {
            kind: MediaKind::Video,
            reply,
        })
        .await
    }

    /// Toggle every microphone track; returns the new microphone flag
    pub async fn toggle_mic(&self) -> Result<bool> {
        self.request(|reply| Command::Toggle {
            kind: MediaKind::Audio,
            reply,
        })
        .await
    }

    /// Replace the local stream; refused while a call is in progress
    pub async fn reacquire_media(&self, constraints: MediaConstraints) -> Result<()> {
        self.request(|reply| Command::ReacquireMedia { constraints, reply })
            .await?
    }

    /// Latest snapshot
    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }

    /// Wait until the snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&CallView) -> bool,
    ) -> Result<CallView> {
        let mut rx = self.view.clone();
        let view = tokio::time::timeout(timeout, rx.wait_for(predicate))
            .await
            .map_err(|_| {
                Error::OperationTimeout("Call view did not reach the expected state".to_string())
            })?
            .map_err(|_| Error::ChannelClosed("Call controller has stopped".to_string()))?;
        Ok(view.clone())
    }

    /// Tear down any call, stop local media and stop the controller
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

struct CallActor {
    machine: CallMachine,
    deps: CallDeps,
    options: CallOptions,
    local: MediaStream,
    camera_on: bool,
    mic_on: bool,
    signaling_status: SignalingStatus,
    active: Option<ActiveLink>,
    pending_open: Option<JoinHandle<()>>,
    answer_timer: Option<JoinHandle<()>>,
    completions: mpsc::UnboundedSender<Completion>,
    notices: mpsc::UnboundedSender<Notice>,
    view: watch::Sender<CallView>,
}

impl CallActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        signaling_rx: broadcast::Receiver<SignalingEvent>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut signaling_rx = Some(signaling_rx);
        info!("Call controller started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        self.reply(reply, ());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = next_signal(&mut signaling_rx) => match event {
                    Ok(event) => self.handle_signaling(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Signaling subscriber lagged, {} event(s) skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Signaling event stream closed");
                        signaling_rx = None;
                        self.signaling_status = SignalingStatus::Offline;
                    }
                },
                Some(completion) = completions.recv() => self.handle_completion(completion).await,
            }
            self.publish();
        }

        info!("Call controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { target, reply } => {
                let result = self.machine.dial(&target);
                let result = self.apply_result(result).await;
                self.reply(reply, result);
            }
            Command::Accept { reply } => {
                let result = self.machine.accept();
                let result = self.apply_result(result).await;
                self.reply(reply, result);
            }
            Command::Decline { reply } => {
                let result = self.machine.decline();
                let result = self.apply_result(result).await;
                self.reply(reply, result);
            }
            Command::HangUp { reply } => {
                let result = self.machine.hang_up();
                let result = self.apply_result(result).await;
                self.reply(reply, result);
            }
            Command::Toggle { kind, reply } => {
                let enabled = self.toggle(kind);
                self.reply(reply, enabled);
            }
            Command::ReacquireMedia { constraints, reply } => {
                let result = self.reacquire(constraints).await;
                self.reply(reply, result);
            }
            Command::Shutdown { .. } => {}
        }
    }

    /// Publish the new snapshot before answering, so callers observe it
    fn reply<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = reply.send(value);
    }

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        debug!("Signaling event: {}", event.name());
        match event {
            SignalingEvent::Connected => self.signaling_status = SignalingStatus::Online,
            SignalingEvent::Identity(id) => {
                self.signaling_status = SignalingStatus::Online;
                self.machine.set_identity(id);
            }
            SignalingEvent::IncomingCall(params) => {
                let effects = self.machine.incoming_call(params);
                self.apply(effects).await;
            }
            SignalingEvent::CallAccepted(answer) => {
                let effects = self.machine.call_accepted(answer);
                self.apply(effects).await;
            }
            SignalingEvent::Reconnecting { attempt } => {
                self.signaling_status = SignalingStatus::Reconnecting;
                self.machine.clear_identity();
                self.notify(Notice::warning(format!(
                    "Signaling connection lost, reconnecting (attempt {})",
                    attempt
                )));
            }
            SignalingEvent::Disconnected { reason } => {
                self.signaling_status = SignalingStatus::Offline;
                self.machine.clear_identity();
                self.notify(Notice::error(format!(
                    "Signaling connection closed: {}",
                    reason
                )));
            }
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::SignalingConnected(Ok(())) => {
                if let Some(id) = self.deps.signaling.local_id() {
                    self.machine.set_identity(id);
                    self.signaling_status = SignalingStatus::Online;
                }
            }
            Completion::SignalingConnected(Err(e)) => {
                error!("Signaling connection failed: {}", e);
                self.signaling_status = SignalingStatus::Offline;
                self.notify(Notice::error(format!(
                    "Could not reach the signaling relay: {}",
                    e
                )));
            }
            Completion::LinkOpened {
                generation,
                link,
                payload,
                events,
            } => self.link_opened(generation, link, payload, events).await,
            Completion::LinkFailed { generation, error } => {
                self.pending_open = None;
                warn!("Peer negotiation failed (session {}): {}", generation, error);
                let effects = self.machine.negotiation_failed(generation, &error.to_string());
                self.apply(effects).await;
            }
            Completion::Peer { generation, event } => {
                let effects = self.machine.peer_event(generation, event);
                self.apply(effects).await;
            }
            Completion::AnswerTimeout { generation } => {
                let effects = self.machine.answer_timeout(generation);
                self.apply(effects).await;
            }
        }
    }

    async fn link_opened(
        &mut self,
        generation: u64,
        link: Arc<dyn PeerLink>,
        payload: SessionDescription,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        if !self.machine.is_current(generation) {
            debug!("Closing link {} from stale session {}", link.id(), generation);
            if let Err(e) = link.close().await {
                warn!("Failed to close stale link: {}", e);
            }
            return;
        }
        self.pending_open = None;

        let completions = self.completions.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if completions.send(Completion::Peer { generation, event }).is_err() {
                    break;
                }
            }
        });

        let role = link.role();
        debug!("Link {} ready for session {} ({})", link.id(), generation, role);
        self.active = Some(ActiveLink {
            generation,
            link,
            forwarder,
        });

        let effects = match role {
            PeerRole::Originator => self.machine.offer_ready(generation, payload),
            PeerRole::Receiver => self.machine.answer_ready(generation, payload),
        };
        self.apply(effects).await;
    }

    async fn apply_result(&mut self, result: Result<Vec<Effect>>) -> Result<()> {
        let effects = result?;
        self.apply(effects).await;
        Ok(())
    }

    /// Carry out effects; failures may queue further effects
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::OpenOutbound { generation } => self.spawn_open(generation, None),
                Effect::OpenInbound { generation, offer } => {
                    self.spawn_open(generation, Some(offer))
                }
                Effect::Send(command) => {
                    let event = command.event_name();
                    if let Err(e) = self.deps.signaling.send(command).await {
                        error!("Failed to send {}: {}", event, e);
                        queue.extend(self.machine.fail(&format!("could not send {}: {}", event, e)));
                    }
                }
                Effect::ApplyAnswer { generation, answer } => {
                    self.spawn_apply_answer(generation, answer)
                }
                Effect::StartAnswerTimer { generation } => self.start_answer_timer(generation),
                Effect::TearDown { generation } => self.tear_down(generation).await,
                Effect::StopLocalMedia => {
                    self.local.stop_all();
                    self.camera_on = false;
                    self.mic_on = false;
                    info!("Local media stopped");
                }
                Effect::Notify(notice) => self.notify(notice),
            }
        }
    }

    fn spawn_connect(&self) {
        let signaling = self.deps.signaling.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = signaling.connect().await;
            let _ = completions.send(Completion::SignalingConnected(result));
        });
    }

    /// Open a link in the background; an offer means receiver role
    fn spawn_open(&mut self, generation: u64, offer: Option<SessionDescription>) {
        let role = if offer.is_some() {
            PeerRole::Receiver
        } else {
            PeerRole::Originator
        };
        let engine = self.deps.engine.clone();
        let local = self.local.clone();
        let completions = self.completions.clone();

        let task = tokio::spawn(async move {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let opened = async {
                let link = engine.open(role, &local, events_tx).await?;
                let payload = match offer {
                    Some(offer) => link.accept_offer(offer).await,
                    None => link.create_offer().await,
                };
                match payload {
                    Ok(payload) => Ok((link, payload)),
                    Err(e) => {
                        let _ = link.close().await;
                        Err(e)
                    }
                }
            }
            .await;

            let completion = match opened {
                Ok((link, payload)) => Completion::LinkOpened {
                    generation,
                    link,
                    payload,
                    events: events_rx,
                },
                Err(error) => Completion::LinkFailed { generation, error },
            };
            let _ = completions.send(completion);
        });

        if let Some(previous) = self.pending_open.replace(task) {
            previous.abort();
        }
    }

    fn spawn_apply_answer(&self, generation: u64, answer: SessionDescription) {
        let Some(active) = self.active.as_ref().filter(|a| a.generation == generation) else {
            warn!("No link for session {} to apply the answer to", generation);
            return;
        };
        let link = active.link.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            if let Err(e) = link.apply_answer(answer).await {
                let _ = completions.send(Completion::Peer {
                    generation,
                    event: PeerEvent::Failed(format!("could not apply answer: {}", e)),
                });
            }
        });
    }

    fn start_answer_timer(&mut self, generation: u64) {
        let Some(secs) = self.options.answer_timeout_secs else {
            return;
        };
        let completions = self.completions.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let _ = completions.send(Completion::AnswerTimeout { generation });
        });
        if let Some(previous) = self.answer_timer.replace(timer) {
            previous.abort();
        }
    }

    /// Cancel pending work and close the link of a session
    async fn tear_down(&mut self, generation: u64) {
        if let Some(task) = self.pending_open.take() {
            task.abort();
        }
        if let Some(timer) = self.answer_timer.take() {
            timer.abort();
        }
        if let Some(active) = self.active.take() {
            if active.generation != generation {
                debug!(
                    "Tearing down session {} with link from session {}",
                    generation, active.generation
                );
            }
            active.forwarder.abort();
            if let Err(e) = active.link.close().await {
                warn!("Error closing link {}: {}", active.link.id(), e);
            }
        }
        debug!("Session {} torn down", generation);
    }

    fn toggle(&mut self, kind: MediaKind) -> bool {
        let flag = match kind {
            MediaKind::Video => &mut self.camera_on,
            MediaKind::Audio => &mut self.mic_on,
        };
        let live = self.local.tracks_of(kind).any(|t| t.is_live());
        if live && self.local.toggle(kind) > 0 {
            *flag = !*flag;
            debug!("{} toggled {}", kind, if *flag { "on" } else { "off" });
        }
        *flag
    }

    async fn reacquire(&mut self, constraints: MediaConstraints) -> Result<()> {
        if !self.machine.state().is_quiescent() {
            return Err(Error::InvalidState(format!(
                "Cannot change media while {}",
                self.machine.state().name()
            )));
        }

        self.local.stop_all();
        match self.deps.devices.get_user_media(&constraints).await {
            Ok(stream) => {
                self.local = stream;
                self.camera_on = self.local.is_kind_enabled(MediaKind::Video);
                self.mic_on = self.local.is_kind_enabled(MediaKind::Audio);
                Ok(())
            }
            Err(e) => {
                warn!("Local media acquisition failed: {}", e);
                self.local = MediaStream::empty();
                self.camera_on = false;
                self.mic_on = false;
                self.notify(Notice::error(format!(
                    "Could not access camera/microphone: {}",
                    e
                )));
                Err(e)
            }
        }
    }

    async fn shutdown(&mut self) {
        let effects = if self.machine.state().has_peer() {
            self.machine.hang_up().unwrap_or_default()
        } else {
            Vec::new()
        };
        self.apply(effects).await;
        if let Some(task) = self.pending_open.take() {
            task.abort();
        }
        self.local.stop_all();
        self.camera_on = false;
        self.mic_on = false;
    }

    fn notify(&self, notice: Notice) {
        info!("{}", notice);
        let _ = self.notices.send(notice);
    }

    fn snapshot(&self) -> CallView {
        CallView {
            display_name: self.machine.display_name().to_string(),
            local_id: self.machine.local_id().map(str::to_string),
            signaling: self.signaling_status,
            state: self.machine.state().clone(),
            camera_on: self.camera_on,
            mic_on: self.mic_on,
            local_tracks: self.local.summaries(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.view.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn next_signal(
    rx: &mut Option<broadcast::Receiver<SignalingEvent>>,
) -> std::result::Result<SignalingEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
