//! In-memory media transport that records every call made on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use huddle_proto::{IceCandidate, PeerId, SdpType, SessionDescription};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use super::rtc::synthetic_media;
use super::{
    LocalMedia, LocalTrack, MediaCapture, MediaError, MediaKind, MediaTransport, RemoteStream,
    RemoteTrack, TransportEvent, TransportEvents, TransportFactory,
};

/// What one mock transport has been asked to do, in call order.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub offers_requested: usize,
    pub local: Vec<SessionDescription>,
    pub remote: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    pub tracks: Vec<String>,
    pub closed: bool,
}

pub struct MockState {
    peer: PeerId,
    log: Mutex<MockLog>,
    offer_requested: Notify,
}

impl MockState {
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn snapshot(&self) -> MockLog {
        self.log.lock().clone()
    }

    /// Resolves once `create_offer` has been called at least `count` times.
    pub async fn offers_requested(&self, count: usize) {
        loop {
            let notified = self.offer_requested.notified();
            if self.log.lock().offers_requested >= count {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Default)]
pub struct MockTransportFactory {
    created: Mutex<Vec<Arc<MockState>>>,
    offer_gate: Mutex<Option<Arc<Notify>>>,
    creation_gates: Mutex<HashMap<PeerId, Arc<Notify>>>,
    fail_remote: AtomicBool,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transports created from now on park in `create_offer` until the
    /// returned gate is notified.
    pub fn hold_offers(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.offer_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// The next `create` for `peer` parks until the returned gate is notified.
    pub fn hold_creation(&self, peer: &PeerId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.creation_gates
            .lock()
            .insert(peer.clone(), Arc::clone(&gate));
        gate
    }

    pub fn fail_remote_descriptions(&self, fail: bool) {
        self.fail_remote.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn transports_for(&self, peer: &PeerId) -> Vec<Arc<MockState>> {
        self.created
            .lock()
            .iter()
            .filter(|state| &state.peer == peer)
            .cloned()
            .collect()
    }

    pub fn latest(&self, peer: &PeerId) -> Option<Arc<MockState>> {
        self.transports_for(peer).pop()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        peer: &PeerId,
    ) -> Result<(Box<dyn MediaTransport>, TransportEvents), MediaError> {
        let gate = self.creation_gates.lock().remove(peer);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let state = Arc::new(MockState {
            peer: peer.clone(),
            log: Mutex::new(MockLog::default()),
            offer_requested: Notify::new(),
        });
        self.created.lock().push(Arc::clone(&state));
        let (events, events_rx) = mpsc::unbounded_channel();
        let transport = MockTransport {
            state,
            events,
            offer_gate: self.offer_gate.lock().clone(),
            fail_remote: self.fail_remote.load(Ordering::SeqCst),
        };
        Ok((Box::new(transport), events_rx))
    }
}

struct MockTransport {
    state: Arc<MockState>,
    events: mpsc::UnboundedSender<TransportEvent>,
    offer_gate: Option<Arc<Notify>>,
    fail_remote: bool,
}

impl MockTransport {
    fn ensure_open(&self) -> Result<(), MediaError> {
        if self.state.log.lock().closed {
            return Err(MediaError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let count = {
            let mut log = self.state.log.lock();
            log.offers_requested += 1;
            log.offers_requested
        };
        self.state.offer_requested.notify_waiters();
        if let Some(gate) = &self.offer_gate {
            gate.notified().await;
        }
        self.ensure_open()?;
        Ok(SessionDescription::offer(format!(
            "v=0 offer to {} #{count}",
            self.state.peer
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        self.ensure_open()?;
        let log = self.state.log.lock();
        match log.remote.last() {
            Some(remote) if remote.sdp_type == SdpType::Offer => Ok(SessionDescription::answer(
                format!("v=0 answer to {}", self.state.peer),
            )),
            _ => Err(MediaError::Description("no remote offer installed".into())),
        }
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.ensure_open()?;
        self.state.log.lock().local.push(description);
        let _ = self
            .events
            .send(TransportEvent::CandidateDiscovered(IceCandidate::new(format!(
                "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host for {}",
                self.state.peer
            ))));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.ensure_open()?;
        if self.fail_remote {
            return Err(MediaError::Description("malformed remote sdp".into()));
        }
        self.state.log.lock().remote.push(description);
        let stream = Arc::new(RemoteStream::new(format!("{}-media", self.state.peer)));
        stream.add_track(Arc::new(MockRemoteTrack::new("video", MediaKind::Video)));
        let _ = self.events.send(TransportEvent::RemoteTrack(stream));
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.ensure_open()?;
        let mut log = self.state.log.lock();
        if log.remote.is_empty() {
            return Err(MediaError::Candidate("no remote description".into()));
        }
        if candidate.candidate.contains("bad") {
            return Err(MediaError::Candidate("unparseable candidate".into()));
        }
        log.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: LocalTrack) -> Result<(), MediaError> {
        self.ensure_open()?;
        self.state.log.lock().tracks.push(track.id().to_owned());
        Ok(())
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.state.log.lock().closed = true;
        Ok(())
    }
}

/// A remote track that never carries media.
pub struct MockRemoteTrack {
    id: String,
    kind: MediaKind,
}

impl MockRemoteTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

#[async_trait]
impl RemoteTrack for MockRemoteTrack {
    fn track_id(&self) -> String {
        self.id.clone()
    }

    fn media_kind(&self) -> MediaKind {
        self.kind
    }

    async fn next_payload(&self) -> Option<Bytes> {
        None
    }
}

/// Capture that either yields synthetic tracks or fails like a denied device.
pub struct MockCapture {
    fail: bool,
}

impl MockCapture {
    pub fn working() -> Arc<Self> {
        Arc::new(Self { fail: false })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self { fail: true })
    }
}

#[async_trait]
impl MediaCapture for MockCapture {
    async fn capture_local_media(&self) -> Result<LocalMedia, MediaError> {
        if self.fail {
            return Err(MediaError::Capture("permission denied".into()));
        }
        Ok(synthetic_media("local"))
    }
}
