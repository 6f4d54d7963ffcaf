//! Signaling vocabulary and channel abstraction
//!
//! Two transports are provided:
//! - WebSocket JSON text frames ([`websocket::WebSocketChannel`])
//! - An in-process room hub ([`memory::MemoryHub`]) for embedding and test harnesses

pub mod bus;
pub mod memory;
pub mod websocket;

use crate::error::Result;
use crate::peer::types::{IceCandidate, ParticipantId, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use bus::EventBus;

/// Receiving end of a bus subscription
pub type Subscription = mpsc::UnboundedReceiver<SignalMessage>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub user_id: ParticipantId,
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: ParticipantId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SdpSignal {
    pub sender: ParticipantId,
    pub target: ParticipantId,
    pub sdp: SessionDescription,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceSignal {
    pub sender: ParticipantId,
    pub target: ParticipantId,
    pub candidate: IceCandidate,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatSignal {
    pub sender: ParticipantId,
    pub message: String,
}

/// Every event exchanged between participants of a room
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalMessage {
    UserJoined(UserJoined),
    UserLeft(UserLeft),
    Offer(SdpSignal),
    Answer(SdpSignal),
    IceCandidate(IceSignal),
    ChatMessage(ChatSignal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    UserJoined,
    UserLeft,
    Offer,
    Answer,
    IceCandidate,
    ChatMessage,
}

impl SignalMessage {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalMessage::UserJoined(_) => SignalKind::UserJoined,
            SignalMessage::UserLeft(_) => SignalKind::UserLeft,
            SignalMessage::Offer(_) => SignalKind::Offer,
            SignalMessage::Answer(_) => SignalKind::Answer,
            SignalMessage::IceCandidate(_) => SignalKind::IceCandidate,
            SignalMessage::ChatMessage(_) => SignalKind::ChatMessage,
        }
    }

    /// Participant the event originates from
    pub fn sender(&self) -> &ParticipantId {
        match self {
            SignalMessage::UserJoined(m) => &m.user_id,
            SignalMessage::UserLeft(m) => &m.user_id,
            SignalMessage::Offer(m) | SignalMessage::Answer(m) => &m.sender,
            SignalMessage::IceCandidate(m) => &m.sender,
            SignalMessage::ChatMessage(m) => &m.sender,
        }
    }

    /// Addressee of a peer-to-peer event; `None` for room-wide events
    pub fn target(&self) -> Option<&ParticipantId> {
        match self {
            SignalMessage::Offer(m) | SignalMessage::Answer(m) => Some(&m.target),
            SignalMessage::IceCandidate(m) => Some(&m.target),
            _ => None,
        }
    }
}

/// Bidirectional event channel scoped to one room.
///
/// `send` is fire-and-forget: an `Ok` only means the message was handed to
/// the transport. Subscribers see inbound events in the order the transport
/// delivered them.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<()>;

    /// Every inbound event
    fn subscribe(&self) -> Subscription;

    /// Inbound events of the given kinds only
    fn subscribe_to(&self, kinds: &[SignalKind]) -> Subscription;
}
