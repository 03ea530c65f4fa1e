//! Test doubles for the peer engine and device provider
//!
//! Enabled with the `testing` feature. [`FakePeerEngine`] negotiates instantly:
//! the offer/answer text carries the sender's track kinds, and each side
//! reports remote media of the kinds the other side offered.

use crate::devices::CatalogDevices;
use crate::media::{DeviceInfo, DeviceKind, MediaConstraints, MediaDevices, MediaKind, MediaStream};
use crate::peer::{
    ConnectionState, PeerEngine, PeerEvent, PeerEventSender, PeerLink, PeerRole, RemoteMedia,
    RemoteTrack, SessionDescription,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct EngineState {
    active: AtomicUsize,
    opened: AtomicUsize,
    fail_open: AtomicBool,
    fail_negotiation: AtomicBool,
    latest: Mutex<Option<PeerEventSender>>,
}

/// Peer engine that negotiates in memory
#[derive(Clone, Default)]
pub struct FakePeerEngine {
    state: Arc<EngineState>,
}

impl FakePeerEngine {
    /// Create an engine with no failures armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Links opened and not yet closed or dropped
    pub fn active_links(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Links opened over the engine's lifetime
    pub fn opened_links(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Make `open` fail
    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make offer/answer creation fail
    pub fn set_fail_negotiation(&self, fail: bool) {
        self.state.fail_negotiation.store(fail, Ordering::SeqCst);
    }

    /// Inject an event on the most recently opened link
    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.state.latest.lock().as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PeerEngine for FakePeerEngine {
    async fn open(
        &self,
        role: PeerRole,
        local: &MediaStream,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(Error::PeerConnectionError("fake open failure".to_string()));
        }

        let kinds = local
            .tracks()
            .iter()
            .filter(|t| t.is_live())
            .map(|t| t.kind())
            .collect();

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.active.fetch_add(1, Ordering::SeqCst);
        *self.state.latest.lock() = Some(events.clone());

        Ok(Arc::new(FakeLink {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            local_kinds: kinds,
            events,
            closed: AtomicBool::new(false),
            engine: self.state.clone(),
        }))
    }
}

struct FakeLink {
    id: String,
    role: PeerRole,
    local_kinds: Vec<MediaKind>,
    events: PeerEventSender,
    closed: AtomicBool,
    engine: Arc<EngineState>,
}

impl FakeLink {
    fn description_text(&self, label: &str) -> String {
        let kinds: Vec<String> = self.local_kinds.iter().map(|k| k.to_string()).collect();
        format!("{} link={} kinds={}", label, self.id, kinds.join(","))
    }

    fn emit(&self, event: PeerEvent) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.events.send(event);
        }
    }

    fn check_negotiation(&self) -> Result<()> {
        if self.engine.fail_negotiation.load(Ordering::SeqCst) {
            return Err(Error::SdpError("fake negotiation failure".to_string()));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::PeerConnectionError("link closed".to_string()));
        }
        Ok(())
    }

    fn remote_from(&self, desc: &SessionDescription) -> RemoteMedia {
        let mut media = RemoteMedia {
            stream_id: format!("remote-{}", self.id),
            tracks: Vec::new(),
        };
        let kinds = desc
            .sdp
            .split_whitespace()
            .find_map(|part| part.strip_prefix("kinds="))
            .unwrap_or_default();
        for kind in kinds.split(',') {
            let kind = match kind {
                "video" => MediaKind::Video,
                "audio" => MediaKind::Audio,
                _ => continue,
            };
            media.add_track(RemoteTrack {
                id: format!("{}-{}", media.stream_id, kind),
                kind,
            });
        }
        media
    }

    fn connect_with(&self, remote: &SessionDescription) {
        self.emit(PeerEvent::StateChanged(ConnectionState::Connecting));
        let media = self.remote_from(remote);
        if !media.is_empty() {
            self.emit(PeerEvent::RemoteMedia(media));
        }
        self.emit(PeerEvent::StateChanged(ConnectionState::Connected));
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> PeerRole {
        self.role
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.check_negotiation()?;
        Ok(SessionDescription::offer(self.description_text("fake-offer")))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.check_negotiation()?;
        self.connect_with(&offer);
        Ok(SessionDescription::answer(self.description_text("fake-answer")))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        self.check_negotiation()?;
        self.connect_with(&answer);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.engine.active.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for FakeLink {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.engine.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Device provider with switchable failures
#[derive(Default)]
pub struct FakeMediaDevices {
    catalog: CatalogDevices,
    fail_enumeration: AtomicBool,
    fail_acquisition: AtomicBool,
    acquisitions: AtomicUsize,
}

impl FakeMediaDevices {
    /// Provider over the given devices
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            catalog: CatalogDevices::new(devices),
            ..Default::default()
        }
    }

    /// One camera (`cam-1`) and one microphone (`mic-1`)
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            DeviceInfo::new("cam-1", "Test Camera", DeviceKind::VideoInput),
            DeviceInfo::new("mic-1", "Test Microphone", DeviceKind::AudioInput),
        ])
    }

    /// Make enumeration fail
    pub fn set_fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Make acquisition fail
    pub fn set_fail_acquisition(&self, fail: bool) {
        self.fail_acquisition.store(fail, Ordering::SeqCst);
    }

    /// Successful acquisitions so far
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(Error::DeviceEnumeration("permission denied".to_string()));
        }
        self.catalog.enumerate_devices().await
    }

    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        if self.fail_acquisition.load(Ordering::SeqCst) {
            return Err(Error::MediaAcquisition("device busy".to_string()));
        }
        let stream = self.catalog.get_user_media(constraints).await?;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_fake_negotiation_reports_remote_kinds() {
        let devices = FakeMediaDevices::with_default_devices();
        let stream = devices
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap();
        let engine = FakePeerEngine::new();

        let (caller_tx, mut caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, mut callee_rx) = mpsc::unbounded_channel();
        let caller = engine.open(PeerRole::Originator, &stream, caller_tx).await.unwrap();
        let callee = engine
            .open(PeerRole::Receiver, &MediaStream::empty(), callee_tx)
            .await
            .unwrap();
        assert_eq!(engine.active_links(), 2);

        let offer = caller.create_offer().await.unwrap();
        let answer = callee.accept_offer(offer).await.unwrap();
        caller.apply_answer(answer).await.unwrap();

        // Callee saw the caller's two tracks
        let mut callee_media = None;
        while let Ok(event) = callee_rx.try_recv() {
            if let PeerEvent::RemoteMedia(media) = event {
                callee_media = Some(media);
            }
        }
        let media = callee_media.unwrap();
        assert!(media.has_kind(MediaKind::Video));
        assert!(media.has_kind(MediaKind::Audio));

        // Caller got nothing back from an empty stream, but did connect
        let events: Vec<PeerEvent> = std::iter::from_fn(|| caller_rx.try_recv().ok()).collect();
        assert!(events.contains(&PeerEvent::StateChanged(ConnectionState::Connected)));
        assert!(!events.iter().any(|e| matches!(e, PeerEvent::RemoteMedia(_))));

        caller.close().await.unwrap();
        caller.close().await.unwrap();
        assert_eq!(engine.active_links(), 1);
        drop(callee);
        assert_eq!(engine.active_links(), 0);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let engine = FakePeerEngine::new();
        engine.set_fail_open(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(engine
            .open(PeerRole::Originator, &MediaStream::empty(), tx.clone())
            .await
            .is_err());

        engine.set_fail_open(false);
        engine.set_fail_negotiation(true);
        let link = engine
            .open(PeerRole::Originator, &MediaStream::empty(), tx)
            .await
            .unwrap();
        assert!(matches!(link.create_offer().await, Err(Error::SdpError(_))));

        let devices = FakeMediaDevices::with_default_devices();
        devices.set_fail_acquisition(true);
        assert!(devices
            .get_user_media(&MediaConstraints::default())
            .await
            .is_err());
        assert_eq!(devices.acquisitions(), 0);
    }
}
