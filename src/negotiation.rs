//! Offer/answer/ICE state machine, one [`PeerSession`] per remote participant.
//!
//! Every handler runs to completion before the call loop hands it the next
//! event, so the registry needs no locking. Events that reference a peer
//! without a live session are dropped silently; a failed offer or answer is
//! logged and leaves that session where it was.

use crate::error::Result;
use crate::media::{LocalMediaController, LocalTrack};
use crate::peer::connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionEvents, ConnectionFactory,
};
use crate::peer::registry::Registry;
use crate::peer::session::PeerSession;
use crate::peer::types::{ConnectionState, IceCandidate, NegotiationState, ParticipantId};
use crate::roster::Presenter;
use crate::signaling::{IceSignal, SdpSignal, SignalMessage, SignalingChannel};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

pub struct NegotiationEngine {
    local_id: ParticipantId,
    registry: Registry,
    factory: Arc<dyn ConnectionFactory>,
    signaling: Arc<dyn SignalingChannel>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    presenter: Presenter,
    idle_timeout: Option<Duration>,
    /// Peers that left or were reaped; only a fresh join brings them back.
    departed: HashSet<ParticipantId>,
}

impl NegotiationEngine {
    /// Returns the engine and the receiver its connections report into.
    pub fn new(
        local_id: ParticipantId,
        factory: Arc<dyn ConnectionFactory>,
        signaling: Arc<dyn SignalingChannel>,
        presenter: Presenter,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            local_id,
            registry: Registry::new(),
            factory,
            signaling,
            events_tx,
            presenter,
            idle_timeout: None,
            departed: HashSet::new(),
        };
        (engine, events_rx)
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut Presenter {
        &mut self.presenter
    }

    pub fn state_of(&self, peer: &ParticipantId) -> Option<NegotiationState> {
        self.registry.state_of(peer)
    }

    /// Lower id initiates. Exactly one side of any pair gets `true`.
    pub fn should_initiate(&self, remote: &ParticipantId) -> bool {
        self.local_id < *remote
    }

    pub async fn handle_signal(&mut self, message: SignalMessage, media: &LocalMediaController) {
        if message.sender() == &self.local_id {
            trace!("Dropping echoed {:?}", message.kind());
            return;
        }
        if let Some(target) = message.target() {
            if target != &self.local_id {
                trace!("Dropping {:?} addressed to {target}", message.kind());
                return;
            }
        }

        match message {
            SignalMessage::UserJoined(joined) => {
                self.on_participant_joined(&joined.user_id, &joined.username, media)
                    .await
            }
            SignalMessage::UserLeft(left) => self.on_participant_left(&left.user_id).await,
            SignalMessage::Offer(offer) => self.on_offer(offer, media).await,
            SignalMessage::Answer(answer) => self.on_answer(answer).await,
            SignalMessage::IceCandidate(ice) => {
                self.on_remote_candidate(&ice.sender, ice.candidate).await
            }
            SignalMessage::ChatMessage(chat) => {
                self.presenter.chat_received(&chat.sender, &chat.message);
            }
        }
    }

    async fn on_participant_joined(
        &mut self,
        peer: &ParticipantId,
        username: &str,
        media: &LocalMediaController,
    ) {
        info!("Participant {peer} ({username}) joined");
        self.departed.remove(peer);
        self.presenter.participant_joined(peer, username);

        if let Some(session) = self.registry.get_mut(peer) {
            debug!("Already have a session for {peer}, ignoring duplicate join");
            session.set_display_name(username);
            return;
        }
        if let Err(e) = self.create_session(peer, username, media).await {
            error!("Could not set up connection to {peer}: {e}");
            return;
        }

        if self.should_initiate(peer) {
            self.send_offer(peer).await;
        } else {
            debug!("Waiting for {peer} to send the offer");
        }
    }

    /// Creates the connection, attaches the active local tracks and registers the session.
    async fn create_session(
        &mut self,
        peer: &ParticipantId,
        display_name: &str,
        media: &LocalMediaController,
    ) -> Result<()> {
        let generation = self.registry.next_generation();
        let events = ConnectionEvents::new(peer.clone(), generation, self.events_tx.clone());
        let connection = self.factory.create(events).await?;

        match media.active_stream() {
            Some(stream) => {
                if let Err(e) = connection.add_local_tracks(stream).await {
                    let _ = connection.close().await;
                    return Err(e);
                }
            }
            None => warn!("No local media to attach for {peer}"),
        }

        let session = PeerSession::new(peer.clone(), generation, connection, display_name);
        let (_, rejected) = self.registry.upsert(session);
        if let Some(duplicate) = rejected {
            let _ = duplicate.connection().close().await;
        }
        Ok(())
    }

    async fn send_offer(&mut self, peer: &ParticipantId) {
        let Some(session) = self.registry.get_mut(peer) else {
            return;
        };
        let offer = match session.connection().create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                error!("Failed to create offer for {peer}: {e}");
                return;
            }
        };
        session.transition(NegotiationState::OfferSent);
        info!("Sending offer to {peer}");
        send_signal(
            self.signaling.as_ref(),
            SignalMessage::Offer(SdpSignal {
                sender: self.local_id.clone(),
                target: peer.clone(),
                sdp: offer,
            }),
        )
        .await;
    }

    async fn on_offer(&mut self, offer: SdpSignal, media: &LocalMediaController) {
        let peer = offer.sender;
        if self.departed.contains(&peer) {
            debug!("Offer from departed {peer}, dropping");
            return;
        }
        if !self.registry.contains(&peer) {
            let name = self
                .presenter
                .roster()
                .display_name(&peer)
                .unwrap_or(peer.as_str())
                .to_string();
            if let Err(e) = self.create_session(&peer, &name, media).await {
                error!("Could not set up connection to {peer} for its offer: {e}");
                return;
            }
            self.presenter.participant_joined(&peer, &name);
        }

        let initiator = self.should_initiate(&peer);
        let Some(session) = self.registry.get_mut(&peer) else {
            return;
        };
        if session.state() == NegotiationState::OfferSent && initiator {
            warn!("Ignoring offer from {peer}: our own offer is pending and we are the initiator");
            return;
        }

        if let Err(e) = session.connection().set_remote_description(offer.sdp).await {
            error!("Failed to apply offer from {peer}: {e}");
            return;
        }
        let prior = session.state();
        session.mark_remote_description();
        session.transition(NegotiationState::OfferReceived);
        flush_pending(session).await;

        let answer = match session.connection().create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Failed to create answer for {peer}: {e}");
                session.transition(prior);
                return;
            }
        };
        session.transition(NegotiationState::Stable);
        info!("Answering offer from {peer}");
        send_signal(
            self.signaling.as_ref(),
            SignalMessage::Answer(SdpSignal {
                sender: self.local_id.clone(),
                target: peer.clone(),
                sdp: answer,
            }),
        )
        .await;
    }

    async fn on_answer(&mut self, answer: SdpSignal) {
        let peer = &answer.sender;
        let Some(session) = self.registry.get_mut(peer) else {
            debug!("Answer from {peer} without a session, dropping");
            return;
        };
        if session.state() != NegotiationState::OfferSent {
            debug!(
                "Answer from {peer} while {:?}, nothing to do",
                session.state()
            );
            return;
        }

        if let Err(e) = session.connection().set_remote_description(answer.sdp).await {
            error!("Failed to apply answer from {peer}: {e}");
            return;
        }
        session.mark_remote_description();
        flush_pending(session).await;
        session.transition(NegotiationState::Stable);
        info!("Negotiation with {peer} complete");
    }

    async fn on_remote_candidate(&mut self, peer: &ParticipantId, candidate: IceCandidate) {
        let Some(session) = self.registry.get_mut(peer) else {
            trace!("Candidate from {peer} without a session, dropping");
            return;
        };
        if !session.has_remote_description() {
            session.pending_candidates().push(peer, candidate);
            return;
        }
        if let Err(e) = session.connection().add_ice_candidate(candidate).await {
            debug!("Failed to add candidate from {peer}: {e}");
        }
    }

    async fn on_participant_left(&mut self, peer: &ParticipantId) {
        info!("Participant {peer} left");
        self.departed.insert(peer.clone());
        self.presenter.participant_left(peer);
        if let Some(session) = self.registry.remove(peer) {
            close_session(session).await;
        }
    }

    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let peer = event.peer;
        let Some(session) = self.registry.get_current(&peer, event.generation) else {
            trace!(
                "Dropping event from stale connection {peer}#{}",
                event.generation
            );
            return;
        };

        match event.kind {
            ConnectionEventKind::LocalCandidate(candidate) => {
                send_signal(
                    self.signaling.as_ref(),
                    SignalMessage::IceCandidate(IceSignal {
                        sender: self.local_id.clone(),
                        target: peer,
                        candidate,
                    }),
                )
                .await;
            }
            ConnectionEventKind::GatheringComplete => {
                debug!("ICE gathering complete for {peer}");
            }
            ConnectionEventKind::RemoteTrack(stream) => {
                session.attach_remote_stream(stream.clone());
                self.presenter.remote_stream(&peer, stream);
            }
            ConnectionEventKind::StateChanged(state) => {
                if state == ConnectionState::Failed {
                    warn!("Connection to {peer} failed");
                }
                self.presenter.connection_state(&peer, state);
            }
        }
    }

    /// Swaps the outbound video on every live session without renegotiating.
    /// Returns how many connections now send `track`.
    pub async fn replace_video_track(&mut self, track: &LocalTrack) -> usize {
        let mut replaced = 0;
        for session in self.registry.iter() {
            let peer = session.participant_id();
            match session.connection().replace_video_track(track).await {
                Ok(true) => replaced += 1,
                Ok(false) => debug!("No video sender towards {peer}"),
                Err(e) => warn!("Video track replacement for {peer} failed: {e}"),
            }
        }
        info!(
            "Outbound video switched to {} on {replaced}/{} connections",
            track.id(),
            self.registry.len()
        );
        replaced
    }

    /// Closes sessions whose offer went unanswered past the idle timeout.
    pub async fn reap_stalled(&mut self, now: Instant) -> Vec<ParticipantId> {
        let Some(timeout) = self.idle_timeout else {
            return Vec::new();
        };
        let stalled = self.registry.stalled(now, timeout);
        for peer in &stalled {
            warn!("No answer from {peer} within {timeout:?}, closing session");
            self.departed.insert(peer.clone());
            if let Some(session) = self.registry.remove(peer) {
                close_session(session).await;
            }
            self.presenter.participant_left(peer);
        }
        stalled
    }

    /// Closes every session and empties the registry. Returns how many were closed.
    pub async fn end_call(&mut self) -> usize {
        let sessions = self.registry.drain();
        let count = sessions.len();
        for session in sessions {
            close_session(session).await;
        }
        if count > 0 {
            info!("Closed {count} peer sessions");
        }
        count
    }
}

async fn close_session(mut session: PeerSession) {
    session.transition(NegotiationState::Closed);
    if let Err(e) = session.connection().close().await {
        warn!(
            "Closing connection to {} failed: {e}",
            session.participant_id()
        );
    }
}

async fn flush_pending(session: &mut PeerSession) {
    let queued = session.pending_candidates().drain();
    if queued.is_empty() {
        return;
    }
    debug!(
        "Applying {} queued candidates for {}",
        queued.len(),
        session.participant_id()
    );
    for candidate in queued {
        if let Err(e) = session.connection().add_ice_candidate(candidate).await {
            debug!(
                "Queued candidate for {} rejected: {e}",
                session.participant_id()
            );
        }
    }
}

/// Fire-and-forget: a failed hand-off is logged, never surfaced.
async fn send_signal(signaling: &dyn SignalingChannel, message: SignalMessage) {
    let kind = message.kind();
    if let Err(e) = signaling.send(message).await {
        warn!("Signaling {kind:?} not delivered: {e}");
    }
}
