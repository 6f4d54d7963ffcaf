//! In-process room hub.
//!
//! Members of a room exchange signaling without any network. A member's
//! `user-joined` announcement is relayed to the others, and the announcer
//! gets one `user-joined` back per member already announced, so every pair
//! learns about each other.

use super::{EventBus, SignalKind, SignalMessage, SignalingChannel, Subscription, UserJoined};
use crate::error::{CallError, Result};
use crate::peer::types::ParticipantId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

struct Member {
    id: ParticipantId,
    username: Option<String>,
    bus: Arc<EventBus>,
}

#[derive(Default)]
pub struct MemoryHub {
    rooms: Mutex<HashMap<String, Vec<Member>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Vec<Member>>> {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `id` in `room`. Nothing is announced until it sends `user-joined`.
    pub fn connect(self: &Arc<Self>, room: &str, id: ParticipantId) -> MemoryChannel {
        let bus = Arc::new(EventBus::new());
        let mut rooms = self.rooms();
        let members = rooms.entry(room.to_string()).or_default();
        members.retain(|m| m.id != id);
        members.push(Member {
            id: id.clone(),
            username: None,
            bus: bus.clone(),
        });
        debug!("Hub: {id} connected to room {room}");

        MemoryChannel {
            hub: self.clone(),
            room: room.to_string(),
            id,
            bus,
        }
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms().get(room).map_or(0, |m| m.len())
    }

    fn route(&self, room: &str, from: &ParticipantId, message: SignalMessage) -> Result<()> {
        let mut rooms = self.rooms();
        let members = rooms
            .get_mut(room)
            .ok_or_else(|| CallError::Signaling(format!("room {room} is gone")))?;
        if !members.iter().any(|m| &m.id == from) {
            return Err(CallError::Signaling(format!("{from} is not in room {room}")));
        }

        match &message {
            SignalMessage::UserJoined(joined) if &joined.user_id == from => {
                let mut replies = Vec::new();
                for member in members.iter_mut() {
                    if &member.id == from {
                        member.username = Some(joined.username.clone());
                    } else if let Some(username) = &member.username {
                        replies.push(SignalMessage::UserJoined(UserJoined {
                            user_id: member.id.clone(),
                            username: username.clone(),
                        }));
                    }
                }
                if let Some(me) = members.iter().find(|m| &m.id == from) {
                    for reply in replies {
                        me.bus.publish(reply);
                    }
                }
            }
            SignalMessage::UserLeft(left) if &left.user_id == from => {
                for member in members.iter().filter(|m| &m.id != from) {
                    member.bus.publish(message.clone());
                }
                members.retain(|m| &m.id != from);
                debug!("Hub: {from} left room {room}");
                return Ok(());
            }
            _ => {}
        }

        for member in members.iter().filter(|m| &m.id != from) {
            member.bus.publish(message.clone());
        }
        Ok(())
    }
}

/// One member's view of a [`MemoryHub`] room
pub struct MemoryChannel {
    hub: Arc<MemoryHub>,
    room: String,
    id: ParticipantId,
    bus: Arc<EventBus>,
}

impl MemoryChannel {
    pub fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn room(&self) -> &str {
        &self.room
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn send(&self, message: SignalMessage) -> Result<()> {
        self.hub.route(&self.room, &self.id, message)
    }

    fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    fn subscribe_to(&self, kinds: &[SignalKind]) -> Subscription {
        self.bus.subscribe_to(kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{ChatSignal, UserLeft};

    fn joined(id: &str, name: &str) -> SignalMessage {
        SignalMessage::UserJoined(UserJoined {
            user_id: id.into(),
            username: name.into(),
        })
    }

    #[tokio::test]
    async fn join_is_announced_both_ways() {
        let hub = MemoryHub::new();
        let a = hub.connect("room", "a".into());
        let mut a_rx = a.subscribe();
        a.send(joined("a", "Ann")).await.unwrap();

        let b = hub.connect("room", "b".into());
        let mut b_rx = b.subscribe();
        b.send(joined("b", "Bob")).await.unwrap();

        assert_eq!(a_rx.try_recv().unwrap(), joined("b", "Bob"));
        assert_eq!(b_rx.try_recv().unwrap(), joined("a", "Ann"));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn messages_stay_in_their_room() {
        let hub = MemoryHub::new();
        let a = hub.connect("one", "a".into());
        let b = hub.connect("one", "b".into());
        let c = hub.connect("two", "c".into());
        let mut b_rx = b.subscribe();
        let mut c_rx = c.subscribe();

        let chat = SignalMessage::ChatMessage(ChatSignal {
            sender: "a".into(),
            message: "hi".into(),
        });
        a.send(chat.clone()).await.unwrap();
        assert_eq!(b_rx.try_recv().unwrap(), chat);
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leaving_removes_member_and_notifies() {
        let hub = MemoryHub::new();
        let a = hub.connect("room", "a".into());
        let b = hub.connect("room", "b".into());
        let mut b_rx = b.subscribe();

        let left = SignalMessage::UserLeft(UserLeft { user_id: "a".into() });
        a.send(left.clone()).await.unwrap();
        assert_eq!(b_rx.try_recv().unwrap(), left);
        assert_eq!(hub.member_count("room"), 1);
        assert!(a.send(joined("a", "Ann")).await.is_err());
    }
}
