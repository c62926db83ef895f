use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use huddle_proto::PeerId;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::PeerSession;
use crate::media::{MediaError, TransportFactory};

/// Creation slot for one peer. Filled once the transport has been built.
type Slot = Arc<OnceCell<Arc<PeerSession>>>;

/// Owns every live peer session and, through it, every media transport.
pub struct SessionRegistry {
    factory: Arc<dyn TransportFactory>,
    slots: Mutex<HashMap<PeerId, Slot>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Returns the session for `peer`, constructing it and its transport if
    /// none exists. Concurrent callers for one peer share a single creation;
    /// other peers are never blocked by it. If the peer is removed while its
    /// transport is being built, the new session is released and `Closed` is
    /// returned.
    pub async fn get_or_create(&self, peer: &PeerId) -> Result<Arc<PeerSession>, MediaError> {
        let slot = Arc::clone(self.slots.lock().entry(peer.clone()).or_default());
        let created = slot
            .get_or_try_init(|| async {
                let (transport, events) = self.factory.create(peer).await?;
                let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                debug!(
                    target = "huddle::session",
                    peer = %peer,
                    generation,
                    "created peer session"
                );
                Ok::<_, MediaError>(Arc::new(PeerSession::new(
                    peer.clone(),
                    generation,
                    transport,
                    events,
                )))
            })
            .await;

        let session = match created {
            Ok(session) => Arc::clone(session),
            Err(err) => {
                self.discard_slot(peer, &slot);
                return Err(err);
            }
        };
        if !self.holds_slot(peer, &slot) {
            debug!(
                target = "huddle::session",
                peer = %peer,
                "peer removed while its session was being created"
            );
            release(&session).await;
            return Err(MediaError::Closed);
        }
        Ok(session)
    }

    fn holds_slot(&self, peer: &PeerId, slot: &Slot) -> bool {
        self.slots
            .lock()
            .get(peer)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drops a slot whose creation failed so the next caller retries.
    fn discard_slot(&self, peer: &PeerId, slot: &Slot) {
        let mut slots = self.slots.lock();
        if slots
            .get(peer)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.get().is_none())
        {
            slots.remove(peer);
        }
    }

    pub async fn get(&self, peer: &PeerId) -> Option<Arc<PeerSession>> {
        self.slots.lock().get(peer)?.get().cloned()
    }

    /// Releases the session's transport and drops its buffered candidates.
    /// A creation still in progress is abandoned. Returns false if there was
    /// no finished session.
    pub async fn remove(&self, peer: &PeerId) -> bool {
        let removed = self.slots.lock().remove(peer);
        match removed.as_ref().and_then(|slot| slot.get()) {
            Some(session) => {
                release(session).await;
                true
            }
            None => false,
        }
    }

    /// True while `session` is still the registered session for its peer.
    pub async fn is_current(&self, session: &Arc<PeerSession>) -> bool {
        self.slots
            .lock()
            .get(session.peer_id())
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// Number of finished sessions.
    pub async fn len(&self) -> usize {
        self.slots.lock().values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(peer, _)| peer.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Removes every session, returning the peers that had one. Creations
    /// still in progress are abandoned.
    pub async fn clear(&self) -> Vec<PeerId> {
        let drained: Vec<(PeerId, Slot)> = self.slots.lock().drain().collect();
        let mut peers = Vec::with_capacity(drained.len());
        for (peer, slot) in drained {
            if let Some(session) = slot.get() {
                release(session).await;
                peers.push(peer);
            }
        }
        peers
    }
}

async fn release(session: &PeerSession) {
    session.clear_pending();
    if let Err(err) = session.transport().close().await {
        warn!(
            target = "huddle::session",
            peer = %session.peer_id(),
            error = %err,
            "failed to close media transport"
        );
    }
    debug!(
        target = "huddle::session",
        peer = %session.peer_id(),
        generation = session.generation(),
        "released peer session"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mock::MockTransportFactory;
    use crate::session::NegotiationPhase;
    use huddle_proto::IceCandidate;
    use std::time::Duration;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let factory = MockTransportFactory::new();
        let registry = SessionRegistry::new(factory.clone());
        let peer = PeerId::from("b");

        let first = registry.get_or_create(&peer).await.unwrap();
        let second = registry.get_or_create(&peer).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);
        assert_eq!(first.phase(), NegotiationPhase::Idle);
        assert!(registry.is_current(&first).await);
    }

    #[tokio::test]
    async fn concurrent_creation_builds_one_transport() {
        let factory = MockTransportFactory::new();
        let registry = Arc::new(SessionRegistry::new(factory.clone()));
        let peer = PeerId::from("b");

        let (a, b) = tokio::join!(registry.get_or_create(&peer), registry.get_or_create(&peer));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn remove_releases_transport_and_buffer() {
        let factory = MockTransportFactory::new();
        let registry = SessionRegistry::new(factory.clone());
        let peer = PeerId::from("b");

        let session = registry.get_or_create(&peer).await.unwrap();
        session.buffer_candidate(IceCandidate::new("candidate:1"));
        assert!(registry.remove(&peer).await);
        assert!(!registry.remove(&peer).await);

        assert_eq!(session.pending_len(), 0);
        assert!(factory.latest(&peer).unwrap().snapshot().closed);
        assert!(registry.get(&peer).await.is_none());
        assert!(!registry.is_current(&session).await);

        let fresh = registry.get_or_create(&peer).await.unwrap();
        assert!(fresh.generation() > session.generation());
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn clear_reports_every_peer() {
        let factory = MockTransportFactory::new();
        let registry = SessionRegistry::new(factory.clone());
        for id in ["c", "b"] {
            registry.get_or_create(&PeerId::from(id)).await.unwrap();
        }
        assert_eq!(registry.peers().await, vec![PeerId::from("b"), PeerId::from("c")]);
        assert_eq!(registry.len().await, 2);

        let mut cleared = registry.clear().await;
        cleared.sort();
        assert_eq!(cleared, vec![PeerId::from("b"), PeerId::from("c")]);
        assert!(registry.is_empty().await);
        assert_eq!(registry.len().await, 0);
        assert!(factory.latest(&PeerId::from("c")).unwrap().snapshot().closed);
    }

    #[tokio::test]
    async fn pending_creation_does_not_block_other_peers() {
        let factory = MockTransportFactory::new();
        let registry = Arc::new(SessionRegistry::new(factory.clone()));
        let slow = PeerId::from("b");
        let gate = factory.hold_creation(&slow);

        let pending = tokio::spawn({
            let registry = Arc::clone(&registry);
            let slow = slow.clone();
            async move { registry.get_or_create(&slow).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        let other = tokio::time::timeout(Duration::from_secs(1), async {
            let session = registry.get_or_create(&PeerId::from("c")).await.unwrap();
            assert!(registry.get(&slow).await.is_none());
            assert_eq!(registry.len().await, 1);
            assert_eq!(registry.peers().await, vec![PeerId::from("c")]);
            session
        })
        .await
        .expect("creation for another peer must not wait on b");
        assert!(registry.is_current(&other).await);

        gate.notify_one();
        let session = pending.await.unwrap().unwrap();
        assert!(registry.is_current(&session).await);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn removal_during_creation_abandons_the_session() {
        let factory = MockTransportFactory::new();
        let registry = Arc::new(SessionRegistry::new(factory.clone()));
        let peer = PeerId::from("b");
        let gate = factory.hold_creation(&peer);

        let pending = tokio::spawn({
            let registry = Arc::clone(&registry);
            let peer = peer.clone();
            async move { registry.get_or_create(&peer).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!registry.remove(&peer).await);
        gate.notify_one();
        assert!(matches!(pending.await.unwrap(), Err(MediaError::Closed)));
        assert!(factory.latest(&peer).unwrap().snapshot().closed);
        assert!(registry.get(&peer).await.is_none());

        let fresh = registry.get_or_create(&peer).await.unwrap();
        assert!(registry.is_current(&fresh).await);
        assert_eq!(factory.created(), 2);
    }
}
