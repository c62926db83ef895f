use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use huddle_proto::{
    AnswerFrom, AssignId, CandidateFrom, ExistingUsers, IceCandidate, OfferFrom, PeerId,
    SessionDescription, UserJoined, UserLeft,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::media::{MediaCapture, TransportFactory};
use crate::negotiation::NegotiationEngine;
use crate::session::SessionRegistry;
use crate::signaling::{ChannelState, SignalingChannel, SignalingError};
use crate::telemetry;
use crate::view::ConferenceView;

pub const LOCAL_MEDIA_HINT: &str =
    "could not access camera and microphone; check device permissions and try again";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("could not access camera and microphone; check device permissions and try again")]
    LocalMediaUnavailable(#[source] crate::media::MediaError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

#[derive(Debug)]
enum RelayEvent {
    Assigned(PeerId),
    Existing(Vec<PeerId>),
    Joined(PeerId),
    Left(PeerId),
    Offer(PeerId, SessionDescription),
    Answer(PeerId, SessionDescription),
    Candidate(PeerId, IceCandidate),
}

/// Connects the relay to the negotiation engine and the view.
pub struct SessionCoordinator {
    channel: Arc<SignalingChannel>,
    engine: NegotiationEngine,
    capture: Arc<dyn MediaCapture>,
    view: Arc<dyn ConferenceView>,
    participants: Arc<AtomicUsize>,
    active: watch::Sender<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
    status: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    pub fn new(
        channel: Arc<SignalingChannel>,
        factory: Arc<dyn TransportFactory>,
        capture: Arc<dyn MediaCapture>,
        view: Arc<dyn ConferenceView>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(factory));
        let engine = NegotiationEngine::new(registry, channel.clone(), Arc::clone(&view));
        let (active, _) = watch::channel(false);
        Self {
            channel,
            engine,
            capture,
            view,
            participants: Arc::new(AtomicUsize::new(1)),
            active,
            pump: Mutex::new(None),
            status: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    pub fn channel(&self) -> &Arc<SignalingChannel> {
        &self.channel
    }

    pub fn participants(&self) -> usize {
        self.participants.load(Ordering::SeqCst)
    }

    /// Acquires local media, wires relay handlers and connects. Nothing
    /// touches the relay when local media is unavailable.
    pub async fn join(&self) -> Result<(), CoordinatorError> {
        if *self.active.borrow() {
            return Ok(());
        }
        let media = match self.capture.capture_local_media().await {
            Ok(media) => media,
            Err(err) => {
                error!(error = %err, "local media unavailable");
                return Err(CoordinatorError::LocalMediaUnavailable(err));
            }
        };
        debug!(stream = %media.stream_id, tracks = media.tracks.len(), "local media ready");
        self.engine.set_local_media(media);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.register_handlers(events_tx);
        self.active.send_replace(true);
        let task = tokio::spawn(pump(
            events_rx,
            self.engine.clone(),
            Arc::clone(&self.view),
            Arc::clone(&self.participants),
        ));
        if let Some(previous) = self.pump.lock().replace(task) {
            previous.abort();
        }
        self.watch_status();

        self.channel.connect().await?;
        info!("joined conference relay");
        Ok(())
    }

    /// Drops every session and disconnects from the relay.
    pub async fn leave(&self) {
        if !self.active.send_replace(false) {
            return;
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.engine.shutdown().await;
        self.channel.close();
        self.participants.store(1, Ordering::SeqCst);
        telemetry::report_all();
        info!("left conference");
    }

    /// Reconnects whenever the relay link drops, backing off between
    /// attempts. Returns after `leave` or once the policy gives up.
    pub async fn keep_connected(&self, policy: &ReconnectPolicy) {
        let mut state = self.channel.subscribe_state();
        let mut active = self.active.subscribe();
        loop {
            tokio::select! {
                closed = wait_closed(&mut state) => {
                    if !closed {
                        return;
                    }
                }
                _ = wait_inactive(&mut active) => return,
            }
            if !*self.active.borrow() {
                return;
            }

            let mut attempt = 0u32;
            loop {
                if !policy.allows(attempt) {
                    warn!(attempts = attempt, "giving up on relay reconnect");
                    return;
                }
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting to relay");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_inactive(&mut active) => return,
                }
                match self.channel.connect().await {
                    Ok(()) => {
                        info!(attempt, "reconnected to relay");
                        break;
                    }
                    Err(SignalingError::AlreadyConnecting) => break,
                    Err(err) => {
                        warn!(attempt, error = %err, "relay reconnect failed");
                        attempt += 1;
                    }
                }
            }
        }
    }

    /// Reports the current connection status once, then forwards changes.
    fn watch_status(&self) {
        let mut status = self.status.lock();
        if status.is_some() {
            return;
        }
        let state = self.channel.subscribe_state();
        let ready = *state.borrow() == ChannelState::Ready;
        self.view.connection_status_changed(ready);
        *status = Some(tokio::spawn(forward_status(
            state,
            Arc::clone(&self.view),
            ready,
        )));
    }

    fn register_handlers(&self, events: mpsc::UnboundedSender<RelayEvent>) {
        let tx = events.clone();
        self.channel.on::<AssignId, _>(move |message| {
            let _ = tx.send(RelayEvent::Assigned(message.user_id));
        });
        let tx = events.clone();
        self.channel.on::<ExistingUsers, _>(move |message| {
            let _ = tx.send(RelayEvent::Existing(message.user_ids));
        });
        let tx = events.clone();
        self.channel.on::<UserJoined, _>(move |message| {
            let _ = tx.send(RelayEvent::Joined(message.user_id));
        });
        let tx = events.clone();
        self.channel.on::<UserLeft, _>(move |message| {
            let _ = tx.send(RelayEvent::Left(message.user_id));
        });
        let tx = events.clone();
        self.channel.on::<OfferFrom, _>(move |message| {
            let _ = tx.send(RelayEvent::Offer(message.from_user_id, message.offer));
        });
        let tx = events.clone();
        self.channel.on::<AnswerFrom, _>(move |message| {
            let _ = tx.send(RelayEvent::Answer(message.from_user_id, message.answer));
        });
        let tx = events;
        self.channel.on::<CandidateFrom, _>(move |message| {
            let _ = tx.send(RelayEvent::Candidate(message.from_user_id, message.candidate));
        });
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        for task in [self.pump.lock().take(), self.status.lock().take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

/// Applies relay events one at a time so an awaited teardown never lets a
/// later message overtake it.
async fn pump(
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
    engine: NegotiationEngine,
    view: Arc<dyn ConferenceView>,
    participants: Arc<AtomicUsize>,
) {
    let set_count = |count: usize| {
        participants.store(count, Ordering::SeqCst);
        view.participant_count_changed(count);
    };
    while let Some(event) = events.recv().await {
        match event {
            RelayEvent::Assigned(id) => {
                info!(local = %id, "relay assigned identity");
                engine.set_local_identity(id).await;
            }
            RelayEvent::Existing(peers) => {
                set_count(peers.len() + 1);
                for peer in peers {
                    engine.peer_discovered(peer);
                }
            }
            RelayEvent::Joined(peer) => {
                set_count(participants.load(Ordering::SeqCst) + 1);
                engine.peer_discovered(peer);
            }
            RelayEvent::Left(peer) => {
                set_count(participants.load(Ordering::SeqCst).saturating_sub(1).max(1));
                engine.peer_left(&peer).await;
            }
            RelayEvent::Offer(from, offer) => engine.offer_received(from, offer),
            RelayEvent::Answer(from, answer) => engine.answer_received(from, answer),
            RelayEvent::Candidate(from, candidate) => engine.candidate_received(from, candidate),
        }
    }
}

async fn forward_status(
    mut state: watch::Receiver<ChannelState>,
    view: Arc<dyn ConferenceView>,
    mut reported: bool,
) {
    while state.changed().await.is_ok() {
        let ready = *state.borrow_and_update() == ChannelState::Ready;
        if ready != reported {
            view.connection_status_changed(ready);
            reported = ready;
        }
    }
}

async fn wait_closed(state: &mut watch::Receiver<ChannelState>) -> bool {
    state
        .wait_for(|current| *current == ChannelState::Closed)
        .await
        .is_ok()
}

async fn wait_inactive(active: &mut watch::Receiver<bool>) {
    let _ = active.wait_for(|active| !*active).await;
}
