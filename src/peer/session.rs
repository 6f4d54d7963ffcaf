use crate::peer::connection::{PeerConnection, RemoteStream};
use crate::peer::ice::PendingCandidates;
use crate::peer::types::{NegotiationState, ParticipantId};
use std::time::{Duration, Instant};
use tracing::debug;

/// Connection state for one remote participant
pub struct PeerSession {
    participant_id: ParticipantId,
    generation: u64,
    connection: Box<dyn PeerConnection>,
    display_name: String,
    state: NegotiationState,
    remote_stream: Option<RemoteStream>,
    pending_candidates: PendingCandidates,
    remote_description_set: bool,
    offer_sent_at: Option<Instant>,
}

impl PeerSession {
    pub fn new(
        participant_id: ParticipantId,
        generation: u64,
        connection: Box<dyn PeerConnection>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            participant_id,
            generation,
            connection,
            display_name: display_name.into(),
            state: NegotiationState::Idle,
            remote_stream: None,
            pending_candidates: PendingCandidates::default(),
            remote_description_set: false,
            offer_sent_at: None,
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> &dyn PeerConnection {
        self.connection.as_ref()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: &str) {
        if !name.is_empty() && name != self.display_name {
            self.display_name = name.to_string();
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: NegotiationState) {
        debug!(
            "Peer {} negotiation {:?} -> {:?}",
            self.participant_id, self.state, next
        );
        self.offer_sent_at = match next {
            NegotiationState::OfferSent => Some(Instant::now()),
            _ => None,
        };
        self.state = next;
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub(crate) fn attach_remote_stream(&mut self, stream: RemoteStream) {
        self.remote_stream = Some(stream);
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub(crate) fn mark_remote_description(&mut self) {
        self.remote_description_set = true;
    }

    pub(crate) fn pending_candidates(&mut self) -> &mut PendingCandidates {
        &mut self.pending_candidates
    }

    /// Parked in `OfferSent` for longer than `timeout`
    pub fn is_stalled(&self, now: Instant, timeout: Duration) -> bool {
        self.state == NegotiationState::OfferSent
            && self
                .offer_sent_at
                .is_some_and(|sent| now.saturating_duration_since(sent) >= timeout)
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("participant_id", &self.participant_id)
            .field("generation", &self.generation)
            .field("display_name", &self.display_name)
            .field("state", &self.state)
            .field("remote_stream", &self.remote_stream)
            .field("pending_candidates", &self.pending_candidates.len())
            .finish()
    }
}
