//! Participant list and chat projections for the presentation layer

use crate::peer::connection::RemoteStream;
use crate::peer::types::{ConnectionState, ParticipantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub is_local: bool,
}

impl Participant {
    pub fn remote(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_local: false,
        }
    }

    pub fn local(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_local: true,
        }
    }
}

/// Members of the call in join order
#[derive(Debug, Default, Clone)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    /// `false` when the id is already listed
    pub fn add(&mut self, participant: Participant) -> bool {
        if self.contains(&participant.id) {
            return false;
        }
        self.participants.push(participant);
        true
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| &p.id == id)?;
        Some(self.participants.remove(idx))
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.iter().any(|p| &p.id == id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn display_name(&self, id: &ParticipantId) -> Option<&str> {
        self.get(id).map(|p| p.display_name.as_str())
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: ParticipantId,
    pub sender_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only chat history
#[derive(Debug, Default, Clone)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// What the view needs to redraw
#[derive(Debug, Clone)]
pub enum ViewEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(ParticipantId),
    RemoteStream {
        peer: ParticipantId,
        stream: RemoteStream,
    },
    ConnectionState {
        peer: ParticipantId,
        state: ConnectionState,
    },
    Chat(ChatMessage),
    LocalMedia {
        video_enabled: bool,
        audio_enabled: bool,
        screen_sharing: bool,
    },
    Notice(String),
}

/// Owns the roster and chat log and forwards every change to the view
#[derive(Debug)]
pub struct Presenter {
    roster: Roster,
    chat: ChatLog,
    view: Option<mpsc::UnboundedSender<ViewEvent>>,
}

impl Presenter {
    pub fn new(local: Participant, view: Option<mpsc::UnboundedSender<ViewEvent>>) -> Self {
        let mut roster = Roster::default();
        roster.add(local);
        Self {
            roster,
            chat: ChatLog::default(),
            view,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat
    }

    fn notify(&self, event: ViewEvent) {
        let Some(view) = &self.view else {
            return;
        };
        if view.send(event).is_err() {
            trace!("View detached, dropping event");
        }
    }

    pub fn participant_joined(&mut self, id: &ParticipantId, display_name: &str) {
        let participant = Participant::remote(id.clone(), display_name);
        if self.roster.add(participant.clone()) {
            debug!("Roster: {id} ({display_name}) joined");
            self.notify(ViewEvent::ParticipantJoined(participant));
        }
    }

    pub fn participant_left(&mut self, id: &ParticipantId) {
        if self.roster.remove(id).is_some() {
            debug!("Roster: {id} left");
            self.notify(ViewEvent::ParticipantLeft(id.clone()));
        }
    }

    pub fn remote_stream(&mut self, peer: &ParticipantId, stream: RemoteStream) {
        self.notify(ViewEvent::RemoteStream {
            peer: peer.clone(),
            stream,
        });
    }

    pub fn connection_state(&mut self, peer: &ParticipantId, state: ConnectionState) {
        self.notify(ViewEvent::ConnectionState {
            peer: peer.clone(),
            state,
        });
    }

    /// Appends a message, labelled with the sender's roster name when known
    pub fn chat_received(&mut self, sender: &ParticipantId, text: &str) -> ChatMessage {
        let message = ChatMessage {
            sender: sender.clone(),
            sender_name: self
                .roster
                .display_name(sender)
                .unwrap_or(sender.as_str())
                .to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.chat.append(message.clone());
        self.notify(ViewEvent::Chat(message.clone()));
        message
    }

    pub fn local_media(&mut self, video_enabled: bool, audio_enabled: bool, screen_sharing: bool) {
        self.notify(ViewEvent::LocalMedia {
            video_enabled,
            audio_enabled,
            screen_sharing,
        });
    }

    pub fn notice(&mut self, text: impl Into<String>) {
        self.notify(ViewEvent::Notice(text.into()));
    }
}
