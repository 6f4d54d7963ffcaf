//! Owned map of live peer sessions

use crate::peer::session::PeerSession;
use crate::peer::types::{NegotiationState, ParticipantId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// At most one [`PeerSession`] per participant.
///
/// Owned by the negotiation engine; other components only read it.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<ParticipantId, PeerSession>,
    next_generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation number for the next session to be created
    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&PeerSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut PeerSession> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Live session whose generation matches, if any
    pub fn get_current(&mut self, id: &ParticipantId, generation: u64) -> Option<&mut PeerSession> {
        self.sessions
            .get_mut(id)
            .filter(|s| s.generation() == generation)
    }

    /// Inserts `session` unless one already exists for its participant.
    ///
    /// Returns the session now registered, and the rejected duplicate (if any)
    /// so the caller can close its connection.
    pub fn upsert(&mut self, session: PeerSession) -> (&mut PeerSession, Option<PeerSession>) {
        match self.sessions.entry(session.participant_id().clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    "Session for {} already exists, keeping generation {}",
                    existing.key(),
                    existing.get().generation()
                );
                (existing.into_mut(), Some(session))
            }
            Entry::Vacant(slot) => {
                info!(
                    "Registered session for {} (generation {})",
                    slot.key(),
                    session.generation()
                );
                (slot.insert(session), None)
            }
        }
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<PeerSession> {
        let removed = self.sessions.remove(id);
        if removed.is_some() {
            info!(
                "Removed session for {} (remaining: {})",
                id,
                self.sessions.len()
            );
        }
        removed
    }

    /// Empties the registry, handing every session to the caller
    pub fn drain(&mut self) -> Vec<PeerSession> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    pub fn state_of(&self, id: &ParticipantId) -> Option<NegotiationState> {
        self.sessions.get(id).map(|s| s.state())
    }

    /// Participants whose offer has gone unanswered for `timeout`
    pub fn stalled(&self, now: Instant, timeout: Duration) -> Vec<ParticipantId> {
        self.sessions
            .values()
            .filter(|s| s.is_stalled(now, timeout))
            .map(|s| s.participant_id().clone())
            .collect()
    }
}
