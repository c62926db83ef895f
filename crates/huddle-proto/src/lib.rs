//! Signaling vocabulary shared by huddle clients and the relay that connects them.
//! Kept free of runtime dependencies so a relay (or a non-Rust client) can reuse
//! the exact wire shapes.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identity assigned by the relay to every participant.
///
/// The derived ordering is the total order used to decide which side of a pair
/// starts negotiation; callers must not rely on anything else about the value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as browsers serialize `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Reachability candidate as browsers serialize `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Values of the `type` discriminator carried by every signaling frame.
pub mod message_type {
    pub const ASSIGN_ID: &str = "assign-id";
    pub const USER_JOINED: &str = "user-joined";
    pub const EXISTING_USERS: &str = "existing-users";
    pub const USER_LEFT: &str = "user-left";
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE_CANDIDATE: &str = "ice-candidate";
}

/// Payload of a frame the relay delivers to a client, keyed by its `type`.
pub trait InboundMessage: DeserializeOwned + Send + 'static {
    const TYPE: &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignId {
    pub user_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub user_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingUsers {
    pub user_ids: Vec<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferFrom {
    pub from_user_id: PeerId,
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerFrom {
    pub from_user_id: PeerId,
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFrom {
    pub from_user_id: PeerId,
    pub candidate: IceCandidate,
}

impl InboundMessage for AssignId {
    const TYPE: &'static str = message_type::ASSIGN_ID;
}

impl InboundMessage for UserJoined {
    const TYPE: &'static str = message_type::USER_JOINED;
}

impl InboundMessage for ExistingUsers {
    const TYPE: &'static str = message_type::EXISTING_USERS;
}

impl InboundMessage for UserLeft {
    const TYPE: &'static str = message_type::USER_LEFT;
}

impl InboundMessage for OfferFrom {
    const TYPE: &'static str = message_type::OFFER;
}

impl InboundMessage for AnswerFrom {
    const TYPE: &'static str = message_type::ANSWER;
}

impl InboundMessage for CandidateFrom {
    const TYPE: &'static str = message_type::ICE_CANDIDATE;
}

/// Every frame a relay may send to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    AssignId(AssignId),
    UserJoined(UserJoined),
    ExistingUsers(ExistingUsers),
    UserLeft(UserLeft),
    Offer(OfferFrom),
    Answer(AnswerFrom),
    IceCandidate(CandidateFrom),
}

/// Frames a client sends to the relay, addressed to one remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signal {
    Offer {
        #[serde(rename = "userId")]
        user_id: PeerId,
        offer: SessionDescription,
    },
    Answer {
        #[serde(rename = "userId")]
        user_id: PeerId,
        answer: SessionDescription,
    },
    IceCandidate {
        #[serde(rename = "userId")]
        user_id: PeerId,
        candidate: IceCandidate,
    },
}

impl Signal {
    pub fn recipient(&self) -> &PeerId {
        match self {
            Signal::Offer { user_id, .. }
            | Signal::Answer { user_id, .. }
            | Signal::IceCandidate { user_id, .. } => user_id,
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => message_type::OFFER,
            Signal::Answer { .. } => message_type::ANSWER,
            Signal::IceCandidate { .. } => message_type::ICE_CANDIDATE,
        }
    }

    /// Rewrites a client signal into the frame its recipient receives.
    pub fn relay_from(self, from: PeerId) -> RelayMessage {
        match self {
            Signal::Offer { offer, .. } => RelayMessage::Offer(OfferFrom {
                from_user_id: from,
                offer,
            }),
            Signal::Answer { answer, .. } => RelayMessage::Answer(AnswerFrom {
                from_user_id: from,
                answer,
            }),
            Signal::IceCandidate { candidate, .. } => RelayMessage::IceCandidate(CandidateFrom {
                from_user_id: from,
                candidate,
            }),
        }
    }
}
