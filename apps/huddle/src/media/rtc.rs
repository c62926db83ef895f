use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use huddle_proto::{IceCandidate, PeerId, SdpType, SessionDescription};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{
    ConnectionState, LocalMedia, LocalTrack, MediaCapture, MediaError, MediaKind, MediaTransport,
    RemoteStream, RemoteTrack, TransportEvent, TransportEvents, TransportFactory,
};

fn to_setup_error<E: std::fmt::Display>(err: E) -> MediaError {
    MediaError::Setup(err.to_string())
}

fn to_description_error<E: std::fmt::Display>(err: E) -> MediaError {
    MediaError::Description(err.to_string())
}

fn build_api() -> Result<API, MediaError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Creates one webrtc-rs peer connection per remote participant.
pub struct RtcTransportFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, MediaError> {
        Ok(Self {
            api: build_api()?,
            ice_servers,
        })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        peer: &PeerId,
    ) -> Result<(Box<dyn MediaTransport>, TransportEvents), MediaError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(to_setup_error)?,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        let candidate_peer = peer.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            let peer = candidate_peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    trace!(target = "huddle::media", peer = %peer, "candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(TransportEvent::CandidateDiscovered(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(err) => warn!(
                        target = "huddle::media",
                        peer = %peer,
                        error = %err,
                        "failed to serialize local candidate"
                    ),
                }
            })
        }));

        let streams: Arc<Mutex<HashMap<String, Arc<RemoteStream>>>> = Arc::default();
        let track_tx = events_tx.clone();
        let track_peer = peer.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            let streams = Arc::clone(&streams);
            let peer = track_peer.clone();
            Box::pin(async move {
                let stream_id = track.stream_id();
                debug!(
                    target = "huddle::media",
                    peer = %peer,
                    stream = %stream_id,
                    kind = ?track.kind(),
                    "remote track received"
                );
                let stream = {
                    let mut streams = streams.lock();
                    Arc::clone(
                        streams
                            .entry(stream_id.clone())
                            .or_insert_with(|| Arc::new(RemoteStream::new(stream_id))),
                    )
                };
                stream.add_track(track as Arc<dyn RemoteTrack>);
                let _ = tx.send(TransportEvent::RemoteTrack(stream));
            })
        }));

        let state_tx = events_tx;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                if let Some(state) = map_state(state) {
                    let _ = tx.send(TransportEvent::StateChanged(state));
                }
            })
        }));

        Ok((Box::new(RtcTransport { pc }), events_rx))
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(MediaError::Description(
                "rollback descriptions are not supported".into(),
            ));
        }
    }
    .map_err(to_description_error)
}

struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl MediaTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(to_description_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(to_description_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(to_description_error)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(to_description_error)
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| MediaError::Candidate(err.to_string()))
    }

    async fn add_track(&self, track: LocalTrack) -> Result<(), MediaError> {
        self.pc
            .add_track(track)
            .await
            .map(|_| ())
            .map_err(|err| MediaError::Track(err.to_string()))
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.pc.close().await.map_err(to_setup_error)
    }
}

#[async_trait]
impl RemoteTrack for TrackRemote {
    fn track_id(&self) -> String {
        self.id()
    }

    fn media_kind(&self) -> MediaKind {
        match self.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }

    async fn next_payload(&self) -> Option<Bytes> {
        match self.read_rtp().await {
            Ok((packet, _)) => Some(packet.payload),
            Err(err) => {
                trace!(target = "huddle::media", error = %err, "remote track ended");
                None
            }
        }
    }
}

/// One VP8 video and one Opus audio track under `stream_id`.
pub fn synthetic_media(stream_id: &str) -> LocalMedia {
    let video: LocalTrack = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
        "video".to_owned(),
        stream_id.to_owned(),
    ));
    let audio: LocalTrack = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        "audio".to_owned(),
        stream_id.to_owned(),
    ));
    LocalMedia {
        stream_id: stream_id.to_owned(),
        tracks: vec![video, audio],
    }
}

/// Local "capture" for headless clients: negotiates real tracks without a
/// camera or microphone behind them.
pub struct SyntheticCapture {
    stream_id: String,
}

impl SyntheticCapture {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

#[async_trait]
impl MediaCapture for SyntheticCapture {
    async fn capture_local_media(&self) -> Result<LocalMedia, MediaError> {
        Ok(synthetic_media(&self.stream_id))
    }
}
