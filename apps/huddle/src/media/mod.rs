//! The media transport capability as the negotiation layer sees it.
//!
//! Everything that touches codecs, ICE or RTP lives behind these traits; the
//! webrtc-rs backed implementation is in [`rtc`] and an in-memory stand-in in
//! [`mock`].

pub mod mock;
pub mod rtc;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use huddle_proto::{IceCandidate, PeerId, SessionDescription};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media transport setup failed: {0}")]
    Setup(String),
    #[error("session description rejected: {0}")]
    Description(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("track error: {0}")]
    Track(String),
    #[error("media transport closed")]
    Closed,
    #[error("local media capture failed: {0}")]
    Capture(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Tracks captured on this machine, attached to every peer session.
#[derive(Clone)]
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<LocalTrack>,
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

#[async_trait]
pub trait RemoteTrack: Send + Sync {
    fn track_id(&self) -> String;
    fn media_kind(&self) -> MediaKind;
    /// Next media payload, `None` once the track has ended.
    async fn next_payload(&self) -> Option<Bytes>;
}

/// Remote tracks sharing one stream id, usually one participant's audio and
/// video. Tracks may keep arriving after the stream was first announced.
pub struct RemoteStream {
    id: String,
    tracks: watch::Sender<Vec<Arc<dyn RemoteTrack>>>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>) -> Self {
        let (tracks, _) = watch::channel(Vec::new());
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adds `track` unless a track with the same id is already present.
    pub fn add_track(&self, track: Arc<dyn RemoteTrack>) -> bool {
        let track_id = track.track_id();
        self.tracks.send_if_modified(|tracks| {
            if tracks.iter().any(|existing| existing.track_id() == track_id) {
                return false;
            }
            tracks.push(track);
            true
        })
    }

    pub fn tracks(&self) -> Vec<Arc<dyn RemoteTrack>> {
        self.tracks.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Arc<dyn RemoteTrack>>> {
        self.tracks.subscribe()
    }
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.borrow().len())
            .finish()
    }
}

#[derive(Debug)]
pub enum TransportEvent {
    /// A local reachability candidate to forward to the peer.
    CandidateDiscovered(IceCandidate),
    RemoteTrack(Arc<RemoteStream>),
    StateChanged(ConnectionState),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One peer connection. Owned exclusively by its `PeerSession`.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, description: SessionDescription)
    -> Result<(), MediaError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;
    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;
    async fn add_track(&self, track: LocalTrack) -> Result<(), MediaError>;
    async fn close(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        peer: &PeerId,
    ) -> Result<(Box<dyn MediaTransport>, TransportEvents), MediaError>;
}

#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn capture_local_media(&self) -> Result<LocalMedia, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::mock::MockRemoteTrack;
    use super::*;

    #[test]
    fn remote_stream_dedupes_tracks_by_id() {
        let stream = RemoteStream::new("b-media");
        let mut updates = stream.subscribe();
        assert!(stream.add_track(Arc::new(MockRemoteTrack::new("audio", MediaKind::Audio))));
        assert!(stream.add_track(Arc::new(MockRemoteTrack::new("video", MediaKind::Video))));
        assert!(!stream.add_track(Arc::new(MockRemoteTrack::new("audio", MediaKind::Audio))));

        assert!(updates.has_changed().unwrap());
        let ids: Vec<String> = updates
            .borrow_and_update()
            .iter()
            .map(|track| track.track_id())
            .collect();
        assert_eq!(ids, vec!["audio".to_string(), "video".to_string()]);
        assert_eq!(stream.tracks().len(), 2);
    }
}
