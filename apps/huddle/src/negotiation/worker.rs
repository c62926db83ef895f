use std::sync::Arc;

use huddle_proto::{IceCandidate, PeerId, SessionDescription, Signal};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::{NegotiationError, Shared};
use crate::media::{ConnectionState, TransportEvent, TransportEvents};
use crate::session::{NegotiationPhase, PeerSession};
use crate::telemetry::PerfGuard;

#[derive(Debug)]
pub(super) enum Command {
    Initiate,
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

/// Serializes everything that happens to one remote peer: relay commands and
/// the events of the peer's transport are handled strictly one at a time.
pub(super) struct PeerWorker {
    peer: PeerId,
    shared: Arc<Shared>,
    session: Option<Arc<PeerSession>>,
    events: Option<TransportEvents>,
    /// Candidates that arrived before any session existed.
    early: Vec<IceCandidate>,
}

impl PeerWorker {
    pub(super) fn new(peer: PeerId, shared: Arc<Shared>) -> Self {
        Self {
            peer,
            shared,
            session: None,
            events: None,
            early: Vec::new(),
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event),
                    None => self.events = None,
                },
            }
        }
        trace!(target = "huddle::negotiation", peer = %self.peer, "peer worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        let result = match command {
            Command::Initiate => self.initiate().await,
            Command::Offer(offer) => self.accept_offer(offer).await,
            Command::Answer(answer) => self.accept_answer(answer).await,
            Command::Candidate(candidate) => {
                self.add_remote_candidate(candidate).await;
                Ok(())
            }
        };
        match result {
            Ok(()) => {}
            Err(NegotiationError::Cancelled) => debug!(
                target = "huddle::negotiation",
                peer = %self.peer,
                "session replaced mid-negotiation; dropping result"
            ),
            Err(NegotiationError::Media(err)) => {
                error!(
                    target = "huddle::negotiation",
                    peer = %self.peer,
                    error = %err,
                    "negotiation failed; tearing down session"
                );
                self.teardown().await;
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::CandidateDiscovered(candidate) => {
                trace!(target = "huddle::negotiation", peer = %self.peer, "sending local candidate");
                self.shared.signals.send_signal(Signal::IceCandidate {
                    user_id: self.peer.clone(),
                    candidate,
                });
            }
            TransportEvent::RemoteTrack(stream) => {
                let Some(session) = &self.session else {
                    return;
                };
                if session.note_rendered(stream.id()) {
                    self.shared.view.render_stream(&self.peer, stream);
                } else {
                    trace!(
                        target = "huddle::negotiation",
                        peer = %self.peer,
                        stream = stream.id(),
                        "stream already rendered"
                    );
                }
            }
            TransportEvent::StateChanged(ConnectionState::Failed) => warn!(
                target = "huddle::negotiation",
                peer = %self.peer,
                "peer connection failed"
            ),
            TransportEvent::StateChanged(state) => debug!(
                target = "huddle::negotiation",
                peer = %self.peer,
                ?state,
                "peer connection state changed"
            ),
        }
    }

    async fn initiate(&mut self) -> Result<(), NegotiationError> {
        if let Some(session) = &self.session {
            let phase = session.phase();
            if phase != NegotiationPhase::Idle {
                debug!(
                    target = "huddle::negotiation",
                    peer = %self.peer,
                    ?phase,
                    "already negotiating; ignoring repeated discovery"
                );
                return Ok(());
            }
        }

        let _perf = PerfGuard::new("negotiation.offer");
        let session = self.open_session().await?;
        let offer = session.transport().create_offer().await?;
        session
            .transport()
            .set_local_description(offer.clone())
            .await?;
        self.ensure_current(&session).await?;
        session.set_phase(NegotiationPhase::OfferSent);
        self.shared.signals.send_signal(Signal::Offer {
            user_id: self.peer.clone(),
            offer,
        });
        info!(target = "huddle::negotiation", peer = %self.peer, "sent offer");
        Ok(())
    }

    async fn accept_offer(&mut self, offer: SessionDescription) -> Result<(), NegotiationError> {
        if let Some(session) = &self.session {
            match session.phase() {
                NegotiationPhase::OfferSent => {
                    warn!(
                        target = "huddle::negotiation",
                        peer = %self.peer,
                        "offer received while our own offer is outstanding; discarding"
                    );
                    return Ok(());
                }
                NegotiationPhase::Stable => debug!(
                    target = "huddle::negotiation",
                    peer = %self.peer,
                    "renegotiation offer"
                ),
                _ => {}
            }
        }

        let _perf = PerfGuard::new("negotiation.answer");
        let session = self.open_session().await?;
        session.transport().set_remote_description(offer).await?;
        session.set_phase(NegotiationPhase::OfferReceived);
        let answer = session.transport().create_answer().await?;
        session
            .transport()
            .set_local_description(answer.clone())
            .await?;
        self.ensure_current(&session).await?;
        self.shared.signals.send_signal(Signal::Answer {
            user_id: self.peer.clone(),
            answer,
        });
        session.set_phase(NegotiationPhase::Stable);
        info!(target = "huddle::negotiation", peer = %self.peer, "sent answer");
        self.drain(&session).await;
        Ok(())
    }

    async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), NegotiationError> {
        let Some(session) = self.session.clone() else {
            debug!(
                target = "huddle::negotiation",
                peer = %self.peer,
                "stale answer without a session; discarding"
            );
            return Ok(());
        };
        match session.phase() {
            NegotiationPhase::OfferSent => {}
            NegotiationPhase::Stable => {
                debug!(
                    target = "huddle::negotiation",
                    peer = %self.peer,
                    "stale answer for a stable session; discarding"
                );
                return Ok(());
            }
            phase => {
                warn!(
                    target = "huddle::negotiation",
                    peer = %self.peer,
                    ?phase,
                    "answer without an outstanding offer; discarding"
                );
                return Ok(());
            }
        }

        session.transport().set_remote_description(answer).await?;
        self.ensure_current(&session).await?;
        session.set_phase(NegotiationPhase::Stable);
        info!(target = "huddle::negotiation", peer = %self.peer, "negotiation complete");
        self.drain(&session).await;
        Ok(())
    }

    async fn add_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(session) = self.session.clone() else {
            self.early.push(candidate);
            trace!(
                target = "huddle::negotiation",
                peer = %self.peer,
                held = self.early.len(),
                "candidate before session; holding"
            );
            return;
        };
        if !session.phase().accepts_candidates() {
            let buffered = session.buffer_candidate(candidate);
            trace!(
                target = "huddle::negotiation",
                peer = %self.peer,
                buffered,
                "remote description not installed; buffering candidate"
            );
            return;
        }
        self.apply_candidate(&session, candidate).await;
    }

    async fn open_session(&mut self) -> Result<Arc<PeerSession>, NegotiationError> {
        if let Some(session) = &self.session {
            return Ok(Arc::clone(session));
        }
        let session = self.shared.registry.get_or_create(&self.peer).await?;
        if let Some(events) = session.take_events() {
            self.events = Some(events);
        }
        for candidate in self.early.drain(..) {
            session.buffer_candidate(candidate);
        }
        self.session = Some(Arc::clone(&session));
        self.attach_local_tracks(&session).await;
        Ok(session)
    }

    async fn attach_local_tracks(&self, session: &PeerSession) {
        if !session.mark_tracks_attached() {
            return;
        }
        let Some(media) = self.shared.local_media.read().clone() else {
            debug!(
                target = "huddle::negotiation",
                peer = %self.peer,
                "no local media; negotiating receive-only"
            );
            return;
        };
        for track in media.tracks {
            if let Err(err) = session.transport().add_track(track).await {
                warn!(
                    target = "huddle::negotiation",
                    peer = %self.peer,
                    error = %err,
                    "failed to attach local track"
                );
            }
        }
    }

    async fn ensure_current(&self, session: &Arc<PeerSession>) -> Result<(), NegotiationError> {
        if self.shared.registry.is_current(session).await {
            Ok(())
        } else {
            Err(NegotiationError::Cancelled)
        }
    }

    async fn drain(&self, session: &PeerSession) {
        let pending = session.take_pending();
        if pending.is_empty() {
            return;
        }
        let _perf = PerfGuard::new("negotiation.drain");
        debug!(
            target = "huddle::negotiation",
            peer = %self.peer,
            count = pending.len(),
            "applying buffered candidates"
        );
        for candidate in pending {
            self.apply_candidate(session, candidate).await;
        }
    }

    async fn apply_candidate(&self, session: &PeerSession, candidate: IceCandidate) {
        if let Err(err) = session.transport().add_candidate(candidate).await {
            warn!(
                target = "huddle::negotiation",
                peer = %self.peer,
                error = %err,
                "failed to apply remote candidate; dropping it"
            );
        }
    }

    async fn teardown(&mut self) {
        self.session = None;
        self.events = None;
        self.early.clear();
        self.shared.registry.remove(&self.peer).await;
        self.shared.view.remove_rendered_stream(&self.peer);
    }
}

async fn next_event(events: &mut Option<TransportEvents>) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
