mod registry;

pub use registry::SessionRegistry;

use huddle_proto::{IceCandidate, PeerId};
use parking_lot::Mutex;

use crate::media::{MediaTransport, TransportEvents};

/// Offer/answer progress of one peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    OfferSent,
    OfferReceived,
    Stable,
}

impl NegotiationPhase {
    /// Remote candidates may only be applied once the description exchange
    /// has completed.
    pub fn accepts_candidates(self) -> bool {
        matches!(self, NegotiationPhase::Stable)
    }
}

#[derive(Debug)]
struct SessionState {
    phase: NegotiationPhase,
    pending: Vec<IceCandidate>,
    tracks_attached: bool,
    rendered_stream: Option<String>,
}

/// Per-peer negotiation state plus the transport it exclusively owns.
///
/// Mutations are serialized by the peer's negotiation worker; the locks here
/// only make reads from elsewhere (introspection, teardown) safe.
pub struct PeerSession {
    peer_id: PeerId,
    generation: u64,
    transport: Box<dyn MediaTransport>,
    state: Mutex<SessionState>,
    events: Mutex<Option<TransportEvents>>,
}

impl PeerSession {
    pub(crate) fn new(
        peer_id: PeerId,
        generation: u64,
        transport: Box<dyn MediaTransport>,
        events: TransportEvents,
    ) -> Self {
        Self {
            peer_id,
            generation,
            transport,
            state: Mutex::new(SessionState {
                phase: NegotiationPhase::Idle,
                pending: Vec::new(),
                tracks_attached: false,
                rendered_stream: None,
            }),
            events: Mutex::new(Some(events)),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Distinguishes successive sessions for the same peer.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport(&self) -> &dyn MediaTransport {
        self.transport.as_ref()
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.state.lock().phase
    }

    pub fn set_phase(&self, phase: NegotiationPhase) {
        self.state.lock().phase = phase;
    }

    pub fn buffer_candidate(&self, candidate: IceCandidate) -> usize {
        let mut state = self.state.lock();
        state.pending.push(candidate);
        state.pending.len()
    }

    /// Empties the reorder buffer, returning candidates in arrival order.
    pub fn take_pending(&self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.state.lock().pending)
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub(crate) fn clear_pending(&self) {
        self.state.lock().pending.clear();
    }

    /// Returns true the first time it is called for this session.
    pub fn mark_tracks_attached(&self) -> bool {
        !std::mem::replace(&mut self.state.lock().tracks_attached, true)
    }

    /// Records `stream_id` as rendered; false if it already was.
    pub fn note_rendered(&self, stream_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.rendered_stream.as_deref() == Some(stream_id) {
            return false;
        }
        state.rendered_stream = Some(stream_id.to_owned());
        true
    }

    /// Event receiver of the owned transport; handed out once.
    pub fn take_events(&self) -> Option<TransportEvents> {
        self.events.lock().take()
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("generation", &self.generation)
            .field("state", &*self.state.lock())
            .finish()
    }
}
