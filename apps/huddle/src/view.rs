use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use huddle_proto::PeerId;
use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::media::{RemoteStream, RemoteTrack};
use crate::telemetry;

/// Everything the conference core tells the presentation layer.
pub trait ConferenceView: Send + Sync {
    fn render_stream(&self, peer: &PeerId, stream: Arc<RemoteStream>);
    fn remove_rendered_stream(&self, peer: &PeerId);
    fn participant_count_changed(&self, count: usize);
    fn connection_status_changed(&self, _connected: bool) {}
}

/// Headless view: consumes remote media and reports it through logs and
/// perf counters.
#[derive(Default)]
pub struct LogView {
    renders: Mutex<HashMap<PeerId, JoinHandle<()>>>,
}

impl LogView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rendering(&self) -> usize {
        self.renders.lock().len()
    }
}

impl ConferenceView for LogView {
    fn render_stream(&self, peer: &PeerId, stream: Arc<RemoteStream>) {
        info!(peer = %peer, stream = stream.id(), "rendering remote stream");
        let task = tokio::spawn(consume_stream(peer.clone(), stream));
        if let Some(previous) = self.renders.lock().insert(peer.clone(), task) {
            previous.abort();
        }
    }

    fn remove_rendered_stream(&self, peer: &PeerId) {
        if let Some(task) = self.renders.lock().remove(peer) {
            task.abort();
            info!(peer = %peer, "removed remote stream");
        }
    }

    fn participant_count_changed(&self, count: usize) {
        info!(count, "participants");
    }

    fn connection_status_changed(&self, connected: bool) {
        if connected {
            info!("connected to relay");
        } else {
            warn!("disconnected from relay");
        }
    }
}

impl Drop for LogView {
    fn drop(&mut self) {
        for (_, task) in self.renders.lock().drain() {
            task.abort();
        }
    }
}

async fn consume_stream(peer: PeerId, stream: Arc<RemoteStream>) {
    let mut updates = stream.subscribe();
    drop(stream);
    let mut started = HashSet::new();
    // dropped with this task, which aborts the drains
    let mut drains = JoinSet::new();
    loop {
        let tracks: Vec<Arc<dyn RemoteTrack>> = updates.borrow_and_update().clone();
        for track in tracks {
            if started.insert(track.track_id()) {
                debug!(
                    peer = %peer,
                    track = %track.track_id(),
                    kind = ?track.media_kind(),
                    "consuming remote track"
                );
                drains.spawn(drain_track(track));
            }
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
    while drains.join_next().await.is_some() {}
}

async fn drain_track(track: Arc<dyn RemoteTrack>) {
    while let Some(payload) = track.next_payload().await {
        telemetry::record_bytes("media.rx", payload.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::media::mock::MockRemoteTrack;

    #[tokio::test]
    async fn replaces_and_removes_renders_per_peer() {
        let view = LogView::new();
        let peer = PeerId::from("b");
        let stream = Arc::new(RemoteStream::new("b-media"));
        stream.add_track(Arc::new(MockRemoteTrack::new("video", MediaKind::Video)));

        view.render_stream(&peer, Arc::clone(&stream));
        view.render_stream(&peer, stream);
        assert_eq!(view.rendering(), 1);

        view.remove_rendered_stream(&peer);
        view.remove_rendered_stream(&peer);
        assert_eq!(view.rendering(), 0);
    }
}
