//! Offer/answer state machine for a full mesh of peers.
//!
//! Who initiates is decided by the total order over [`PeerId`]: of any two
//! participants only the lower one sends an offer. Everything that happens to
//! one remote peer runs on that peer's worker task, in arrival order; peers are
//! independent of each other.

mod worker;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use huddle_proto::{IceCandidate, PeerId, SessionDescription};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::media::{LocalMedia, MediaError};
use crate::session::{NegotiationPhase, SessionRegistry};
use crate::signaling::SignalSink;
use crate::view::ConferenceView;
use worker::{Command, PeerWorker};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("session was replaced while negotiating")]
    Cancelled,
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Collaborators shared by every peer worker.
struct Shared {
    registry: Arc<SessionRegistry>,
    signals: Arc<dyn SignalSink>,
    view: Arc<dyn ConferenceView>,
    local_media: RwLock<Option<LocalMedia>>,
}

struct WorkerHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Most departed peers remembered at once. Relay identities are not reused
/// in practice, so older tombstones only guard against long-delayed signals.
const DEPARTED_CAPACITY: usize = 512;

/// Bounded set of departed peers; the oldest departure is forgotten first.
struct Tombstones {
    members: HashSet<PeerId>,
    order: VecDeque<PeerId>,
    capacity: usize,
}

impl Default for Tombstones {
    fn default() -> Self {
        Self::with_capacity(DEPARTED_CAPACITY)
    }
}

impl Tombstones {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            members: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, peer: PeerId) {
        if self.members.contains(&peer) {
            self.order.retain(|departed| departed != &peer);
        } else {
            self.members.insert(peer.clone());
        }
        self.order.push_back(peer);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, peer: &PeerId) {
        if self.members.remove(peer) {
            self.order.retain(|departed| departed != peer);
        }
    }

    fn contains(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }

    fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }
}

#[derive(Default)]
struct EngineState {
    local_id: Option<PeerId>,
    /// Discoveries seen before the relay assigned our identity.
    deferred: Vec<PeerId>,
    workers: HashMap<PeerId, WorkerHandle>,
    /// Peers reported as left; their stale signals are ignored.
    departed: Tombstones,
}

struct EngineInner {
    shared: Arc<Shared>,
    state: Mutex<EngineState>,
}

#[derive(Clone)]
pub struct NegotiationEngine {
    inner: Arc<EngineInner>,
}

impl NegotiationEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        signals: Arc<dyn SignalSink>,
        view: Arc<dyn ConferenceView>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                shared: Arc::new(Shared {
                    registry,
                    signals,
                    view,
                    local_media: RwLock::new(None),
                }),
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    /// Tracks attached to every session created from now on.
    pub fn set_local_media(&self, media: LocalMedia) {
        *self.inner.shared.local_media.write() = Some(media);
    }

    pub fn local_identity(&self) -> Option<PeerId> {
        self.inner.state.lock().local_id.clone()
    }

    /// Installs the identity the relay assigned us and replays discoveries
    /// that were waiting for it. A different identity than before means the
    /// relay treats us as a new participant, so existing sessions are dropped.
    pub async fn set_local_identity(&self, id: PeerId) {
        let stale_workers = {
            let mut state = self.inner.state.lock();
            match state.local_id.replace(id.clone()) {
                Some(previous) if previous != id => {
                    info!(
                        target = "huddle::negotiation",
                        previous = %previous,
                        current = %id,
                        "local identity changed; resetting sessions"
                    );
                    state.departed.clear();
                    Some(state.workers.drain().map(|(_, handle)| handle).collect::<Vec<_>>())
                }
                _ => None,
            }
        };
        if let Some(workers) = stale_workers {
            self.stop_all(workers).await;
        }
        debug!(target = "huddle::negotiation", local = %id, "local identity assigned");

        let deferred = std::mem::take(&mut self.inner.state.lock().deferred);
        for peer in deferred {
            self.peer_discovered(peer);
        }
    }

    /// A remote participant is present. Starts negotiation if we are the
    /// lower identity of the pair; otherwise waits for their offer.
    pub fn peer_discovered(&self, peer: PeerId) {
        let mut state = self.inner.state.lock();
        let Some(local) = state.local_id.clone() else {
            if !state.deferred.contains(&peer) {
                debug!(
                    target = "huddle::negotiation",
                    peer = %peer,
                    "identity not assigned yet; deferring discovery"
                );
                state.deferred.push(peer);
            }
            return;
        };
        if peer == local {
            trace!(target = "huddle::negotiation", "ignoring discovery of ourselves");
            return;
        }
        state.departed.remove(&peer);
        if local > peer {
            debug!(
                target = "huddle::negotiation",
                peer = %peer,
                "remote side initiates; waiting for offer"
            );
            return;
        }
        self.enqueue(&mut state, peer, Command::Initiate);
    }

    pub fn offer_received(&self, from: PeerId, offer: SessionDescription) {
        let mut state = self.inner.state.lock();
        if state.departed.contains(&from) {
            debug!(
                target = "huddle::negotiation",
                peer = %from,
                "offer from departed peer; discarding"
            );
            return;
        }
        self.enqueue(&mut state, from, Command::Offer(offer));
    }

    pub fn answer_received(&self, from: PeerId, answer: SessionDescription) {
        let mut state = self.inner.state.lock();
        if state.departed.contains(&from) || !state.workers.contains_key(&from) {
            debug!(
                target = "huddle::negotiation",
                peer = %from,
                "stale answer without a session; discarding"
            );
            return;
        }
        self.enqueue(&mut state, from, Command::Answer(answer));
    }

    pub fn candidate_received(&self, from: PeerId, candidate: IceCandidate) {
        let mut state = self.inner.state.lock();
        if state.departed.contains(&from) {
            debug!(
                target = "huddle::negotiation",
                peer = %from,
                "candidate from departed peer; discarding"
            );
            return;
        }
        self.enqueue(&mut state, from, Command::Candidate(candidate));
    }

    /// Tears the peer's session down. In-flight work for it is cancelled and
    /// later signals from it are ignored until it is discovered again.
    pub async fn peer_left(&self, peer: &PeerId) {
        let worker = {
            let mut state = self.inner.state.lock();
            state.departed.insert(peer.clone());
            state.deferred.retain(|deferred| deferred != peer);
            state.workers.remove(peer)
        };
        if let Some(worker) = worker {
            worker.stop().await;
        }
        let removed = self.inner.shared.registry.remove(peer).await;
        self.inner.shared.view.remove_rendered_stream(peer);
        info!(
            target = "huddle::negotiation",
            peer = %peer,
            had_session = removed,
            "peer left"
        );
    }

    /// Stops every worker and releases every session.
    pub async fn shutdown(&self) {
        let workers = {
            let mut state = self.inner.state.lock();
            state.local_id = None;
            state.deferred.clear();
            state.departed.clear();
            state.workers.drain().map(|(_, handle)| handle).collect::<Vec<_>>()
        };
        self.stop_all(workers).await;
        debug!(target = "huddle::negotiation", "negotiation engine shut down");
    }

    pub async fn phase(&self, peer: &PeerId) -> Option<NegotiationPhase> {
        let session = self.inner.shared.registry.get(peer).await?;
        Some(session.phase())
    }

    /// Length of the session's reorder buffer. Candidates held before the
    /// session exists are not counted.
    pub async fn pending_candidates(&self, peer: &PeerId) -> usize {
        match self.inner.shared.registry.get(peer).await {
            Some(session) => session.pending_len(),
            None => 0,
        }
    }

    pub async fn peers(&self) -> Vec<PeerId> {
        self.inner.shared.registry.peers().await
    }

    async fn stop_all(&self, workers: Vec<WorkerHandle>) {
        for worker in workers {
            worker.stop().await;
        }
        for peer in self.inner.shared.registry.clear().await {
            self.inner.shared.view.remove_rendered_stream(&peer);
        }
    }

    fn enqueue(&self, state: &mut EngineState, peer: PeerId, command: Command) {
        let command = match state.workers.get(&peer) {
            Some(worker) => match worker.commands.send(command) {
                Ok(()) => return,
                Err(mpsc::error::SendError(command)) => {
                    warn!(
                        target = "huddle::negotiation",
                        peer = %peer,
                        "peer worker exited; restarting"
                    );
                    command
                }
            },
            None => command,
        };
        let worker = self.spawn_worker(peer.clone());
        let _ = worker.commands.send(command);
        state.workers.insert(peer, worker);
    }

    fn spawn_worker(&self, peer: PeerId) -> WorkerHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = PeerWorker::new(peer, Arc::clone(&self.inner.shared));
        WorkerHandle {
            commands,
            task: tokio::spawn(worker.run(rx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::RemoteStream;
    use crate::media::mock::MockTransportFactory;
    use crate::media::rtc::synthetic_media;
    use huddle_proto::Signal;
    use std::time::Duration;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    struct RecordingSink(UnboundedSender<Signal>);

    impl SignalSink for RecordingSink {
        fn send_signal(&self, signal: Signal) {
            let _ = self.0.send(signal);
        }
    }

    #[derive(Debug, PartialEq)]
    enum ViewEvent {
        Render(PeerId, String),
        Remove(PeerId),
    }

    struct RecordingView(UnboundedSender<ViewEvent>);

    impl ConferenceView for RecordingView {
        fn render_stream(&self, peer: &PeerId, stream: Arc<RemoteStream>) {
            let _ = self.0.send(ViewEvent::Render(peer.clone(), stream.id().to_owned()));
        }

        fn remove_rendered_stream(&self, peer: &PeerId) {
            let _ = self.0.send(ViewEvent::Remove(peer.clone()));
        }

        fn participant_count_changed(&self, _count: usize) {}
    }

    struct Harness {
        engine: NegotiationEngine,
        factory: Arc<MockTransportFactory>,
        signals: UnboundedReceiver<Signal>,
        views: UnboundedReceiver<ViewEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let factory = MockTransportFactory::new();
            let registry = Arc::new(SessionRegistry::new(factory.clone()));
            let (signal_tx, signals) = unbounded_channel();
            let (view_tx, views) = unbounded_channel();
            let engine = NegotiationEngine::new(
                registry,
                Arc::new(RecordingSink(signal_tx)),
                Arc::new(RecordingView(view_tx)),
            );
            engine.set_local_media(synthetic_media("local"));
            Self {
                engine,
                factory,
                signals,
                views,
            }
        }

        async fn next_signal(&mut self) -> Signal {
            tokio::time::timeout(Duration::from_secs(5), self.signals.recv())
                .await
                .expect("timed out waiting for a signal")
                .expect("signal sink closed")
        }

        /// Next signal that is not a local candidate.
        async fn next_description(&mut self) -> Signal {
            loop {
                match self.next_signal().await {
                    Signal::IceCandidate { .. } => continue,
                    other => return other,
                }
            }
        }

        async fn settle(&self) {
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        fn no_descriptions_sent(&mut self) -> bool {
            while let Ok(signal) = self.signals.try_recv() {
                if !matches!(signal, Signal::IceCandidate { .. }) {
                    return false;
                }
            }
            true
        }
    }

    fn offer() -> SessionDescription {
        SessionDescription::offer("v=0 remote offer")
    }

    fn answer() -> SessionDescription {
        SessionDescription::answer("v=0 remote answer")
    }

    #[tokio::test]
    async fn lower_identity_initiates() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("b".into());

        match h.next_description().await {
            Signal::Offer { user_id, .. } => assert_eq!(user_id, PeerId::from("b")),
            other => panic!("expected offer, got {other:?}"),
        }
        assert_eq!(
            h.engine.phase(&"b".into()).await,
            Some(NegotiationPhase::OfferSent)
        );
        let log = h.factory.latest(&"b".into()).unwrap().snapshot();
        assert_eq!(log.tracks, vec!["video".to_string(), "audio".to_string()]);
        assert_eq!(log.local.len(), 1);
    }

    #[tokio::test]
    async fn higher_identity_waits_for_offer() {
        let mut h = Harness::new();
        h.engine.set_local_identity("b".into()).await;
        h.engine.peer_discovered("a".into());
        h.settle().await;

        assert!(h.no_descriptions_sent());
        assert_eq!(h.factory.created(), 0);
        assert!(h.engine.peers().await.is_empty());
    }

    #[tokio::test]
    async fn discovery_before_identity_is_replayed() {
        let mut h = Harness::new();
        h.engine.peer_discovered("b".into());
        h.engine.peer_discovered("b".into());
        h.settle().await;
        assert_eq!(h.factory.created(), 0);

        h.engine.set_local_identity("a".into()).await;
        assert!(matches!(h.next_description().await, Signal::Offer { .. }));
        h.settle().await;
        assert!(h.no_descriptions_sent());
        assert_eq!(h.factory.created(), 1);
    }

    #[tokio::test]
    async fn self_discovery_is_ignored() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("a".into());
        h.settle().await;
        assert!(h.no_descriptions_sent());
        assert_eq!(h.factory.created(), 0);
    }

    #[tokio::test]
    async fn duplicate_discovery_sends_one_offer() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("b".into());
        h.engine.peer_discovered("b".into());

        assert!(matches!(h.next_description().await, Signal::Offer { .. }));
        h.settle().await;
        assert!(h.no_descriptions_sent());
        assert_eq!(h.factory.latest(&"b".into()).unwrap().snapshot().offers_requested, 1);
    }

    #[tokio::test]
    async fn answer_completes_initiator_path() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("b".into());
        h.next_description().await;

        h.engine.candidate_received("b".into(), IceCandidate::new("candidate:early"));
        h.engine.answer_received("b".into(), answer());
        h.engine.candidate_received("b".into(), IceCandidate::new("candidate:late"));
        h.settle().await;

        assert_eq!(h.engine.phase(&"b".into()).await, Some(NegotiationPhase::Stable));
        let log = h.factory.latest(&"b".into()).unwrap().snapshot();
        assert_eq!(log.remote, vec![answer()]);
        let applied: Vec<&str> = log.candidates.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(applied, vec!["candidate:early", "candidate:late"]);
        assert_eq!(
            h.views.recv().await,
            Some(ViewEvent::Render("b".into(), "b-media".into()))
        );
    }

    #[tokio::test]
    async fn answer_in_idle_is_discarded() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.answer_received("b".into(), answer());
        h.settle().await;

        assert_eq!(h.factory.created(), 0);
        assert_eq!(h.engine.phase(&"b".into()).await, None);
    }

    #[tokio::test]
    async fn answer_while_answering_is_discarded() {
        let mut h = Harness::new();
        h.engine.set_local_identity("b".into()).await;
        h.engine.offer_received("a".into(), offer());
        h.next_description().await;

        h.engine.answer_received("a".into(), answer());
        h.settle().await;
        let log = h.factory.latest(&"a".into()).unwrap().snapshot();
        assert_eq!(log.remote, vec![offer()]);
        assert_eq!(h.engine.phase(&"a".into()).await, Some(NegotiationPhase::Stable));
    }

    #[tokio::test]
    async fn early_candidates_apply_in_order_after_answer() {
        let mut h = Harness::new();
        h.engine.set_local_identity("d".into()).await;
        for n in 1..=3 {
            h.engine
                .candidate_received("c".into(), IceCandidate::new(format!("candidate:{n}")));
        }
        h.settle().await;
        assert_eq!(h.factory.created(), 0);

        h.engine.offer_received("c".into(), offer());
        match h.next_description().await {
            Signal::Answer { user_id, .. } => assert_eq!(user_id, PeerId::from("c")),
            other => panic!("expected answer, got {other:?}"),
        }
        h.settle().await;

        let log = h.factory.latest(&"c".into()).unwrap().snapshot();
        let applied: Vec<&str> = log.candidates.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(applied, vec!["candidate:1", "candidate:2", "candidate:3"]);
        assert_eq!(h.engine.pending_candidates(&"c".into()).await, 0);
        assert_eq!(h.engine.phase(&"c".into()).await, Some(NegotiationPhase::Stable));
    }

    #[tokio::test]
    async fn bad_candidate_does_not_abort_session() {
        let mut h = Harness::new();
        h.engine.set_local_identity("b".into()).await;
        h.engine.candidate_received("a".into(), IceCandidate::new("candidate:bad"));
        h.engine.candidate_received("a".into(), IceCandidate::new("candidate:good"));
        h.engine.offer_received("a".into(), offer());
        h.next_description().await;
        h.settle().await;

        let log = h.factory.latest(&"a".into()).unwrap().snapshot();
        assert_eq!(log.candidates.len(), 1);
        assert_eq!(log.candidates[0].candidate, "candidate:good");
        assert_eq!(h.engine.phase(&"a".into()).await, Some(NegotiationPhase::Stable));
    }

    #[tokio::test]
    async fn local_candidates_are_forwarded() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("b".into());

        let mut saw_candidate = false;
        for _ in 0..2 {
            if let Signal::IceCandidate { user_id, .. } = h.next_signal().await {
                assert_eq!(user_id, PeerId::from("b"));
                saw_candidate = true;
            }
        }
        assert!(saw_candidate);
    }

    #[tokio::test]
    async fn stale_signals_after_departure_are_ignored() {
        let mut h = Harness::new();
        h.engine.set_local_identity("b".into()).await;
        h.engine.offer_received("a".into(), offer());
        h.next_description().await;

        h.engine.peer_left(&"a".into()).await;
        assert!(h.factory.latest(&"a".into()).unwrap().snapshot().closed);

        h.engine.offer_received("a".into(), offer());
        h.engine.answer_received("a".into(), answer());
        h.engine.candidate_received("a".into(), IceCandidate::new("candidate:1"));
        h.settle().await;

        assert_eq!(h.factory.created(), 1);
        assert!(h.engine.peers().await.is_empty());
        assert!(h.no_descriptions_sent());

        // rediscovery lifts the tombstone
        h.engine.peer_discovered("a".into());
        h.engine.offer_received("a".into(), offer());
        assert!(matches!(h.next_description().await, Signal::Answer { .. }));
        assert_eq!(h.factory.created(), 2);
    }

    #[tokio::test]
    async fn departure_cancels_pending_offer() {
        let mut h = Harness::new();
        let gate = h.factory.hold_offers();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("b".into());

        let transport = loop {
            if let Some(state) = h.factory.latest(&"b".into()) {
                break state;
            }
            tokio::task::yield_now().await;
        };
        transport.offers_requested(1).await;

        h.engine.peer_left(&"b".into()).await;
        gate.notify_waiters();
        h.settle().await;

        assert!(h.no_descriptions_sent());
        assert!(h.engine.peers().await.is_empty());
        assert!(transport.snapshot().closed);
    }

    #[tokio::test]
    async fn failed_remote_description_tears_down_session() {
        let mut h = Harness::new();
        h.engine.set_local_identity("b".into()).await;
        h.factory.fail_remote_descriptions(true);
        h.engine.offer_received("a".into(), offer());
        h.settle().await;

        assert!(h.engine.peers().await.is_empty());
        assert!(h.factory.latest(&"a".into()).unwrap().snapshot().closed);
        assert_eq!(h.views.recv().await, Some(ViewEvent::Remove("a".into())));

        // the worker survives and a later offer starts over
        h.factory.fail_remote_descriptions(false);
        h.engine.offer_received("a".into(), offer());
        assert!(matches!(h.next_description().await, Signal::Answer { .. }));
        assert_eq!(h.factory.created(), 2);
    }

    #[tokio::test]
    async fn offer_during_own_offer_is_discarded() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("b".into());
        h.next_description().await;

        h.engine.offer_received("b".into(), offer());
        h.settle().await;
        assert!(h.no_descriptions_sent());
        assert_eq!(
            h.engine.phase(&"b".into()).await,
            Some(NegotiationPhase::OfferSent)
        );
    }

    #[tokio::test]
    async fn identity_change_resets_sessions() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("b".into());
        h.next_description().await;

        h.engine.set_local_identity("c".into()).await;
        assert!(h.engine.peers().await.is_empty());
        assert!(h.factory.latest(&"b".into()).unwrap().snapshot().closed);
        assert_eq!(h.engine.local_identity(), Some(PeerId::from("c")));

        h.engine.peer_discovered("b".into());
        h.settle().await;
        assert_eq!(h.factory.created(), 1);
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let mut h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        h.engine.peer_discovered("b".into());
        h.engine.peer_discovered("c".into());
        h.next_description().await;
        h.next_description().await;

        h.engine.shutdown().await;
        assert!(h.engine.peers().await.is_empty());
        assert_eq!(h.engine.local_identity(), None);
        for peer in ["b", "c"] {
            assert!(h.factory.latest(&peer.into()).unwrap().snapshot().closed);
        }
    }

    #[test]
    fn tombstones_forget_the_oldest_departure() {
        let mut departed = Tombstones::with_capacity(3);
        for peer in ["a", "b", "c"] {
            departed.insert(peer.into());
        }
        // A repeated departure counts as the newest.
        departed.insert("a".into());
        departed.insert("d".into());

        assert!(!departed.contains(&"b".into()));
        for peer in ["a", "c", "d"] {
            assert!(departed.contains(&peer.into()));
        }
        assert_eq!(departed.members.len(), departed.order.len());

        departed.remove(&"c".into());
        departed.insert("e".into());
        departed.insert("f".into());
        assert!(!departed.contains(&"a".into()));
        let order: Vec<_> = departed.order.iter().map(PeerId::as_str).collect();
        assert_eq!(order, ["d", "e", "f"]);
    }

    #[tokio::test]
    async fn departure_tombstones_stay_bounded() {
        let h = Harness::new();
        h.engine.set_local_identity("a".into()).await;
        for n in 0..DEPARTED_CAPACITY + 10 {
            h.engine.peer_left(&PeerId::from(format!("gone-{n}"))).await;
        }
        let state = h.engine.inner.state.lock();
        assert_eq!(state.departed.members.len(), DEPARTED_CAPACITY);
        assert!(!state.departed.contains(&PeerId::from("gone-0")));
        assert!(state.departed.contains(&PeerId::from(format!("gone-{}", DEPARTED_CAPACITY + 9))));
    }
}
