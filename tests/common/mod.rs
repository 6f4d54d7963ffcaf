#![allow(dead_code)]

use huddle_lib::media::{DevicePermissions, LocalMediaController, SampleDevices};
use huddle_lib::peer::fake::{FakeConnectionFactory, FakeHandle};
use huddle_lib::peer::{ConnectionEvent, NegotiationState, ParticipantId};
use huddle_lib::roster::{Participant, Presenter};
use huddle_lib::signaling::memory::{MemoryChannel, MemoryHub};
use huddle_lib::signaling::{SignalMessage, SignalingChannel, Subscription, UserJoined, UserLeft};
use huddle_lib::NegotiationEngine;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const ROOM: &str = "room-1";

/// One participant driven by hand: no call loop, events are pumped explicitly
pub struct Peer {
    pub id: ParticipantId,
    pub engine: NegotiationEngine,
    pub media: LocalMediaController,
    pub factory: Arc<FakeConnectionFactory>,
    pub channel: Arc<MemoryChannel>,
    inbound: Subscription,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Peer {
    /// Connects to the hub, acquires fake camera/mic and announces itself
    pub async fn join(hub: &Arc<MemoryHub>, id: &str) -> Self {
        let id = ParticipantId::from(id);
        let factory = FakeConnectionFactory::new(id.as_str());
        let channel = Arc::new(hub.connect(ROOM, id.clone()));
        let inbound = channel.subscribe();

        let (devices, _feed) = SampleDevices::new(DevicePermissions::default());
        let mut media = LocalMediaController::new(Arc::new(devices));
        media.acquire_camera_and_mic().await.unwrap();

        let presenter = Presenter::new(Participant::local(id.clone(), id.as_str()), None);
        let (engine, events) =
            NegotiationEngine::new(id.clone(), factory.clone(), channel.clone(), presenter);

        channel
            .send(SignalMessage::UserJoined(UserJoined {
                user_id: id.clone(),
                username: id.as_str().to_uppercase(),
            }))
            .await
            .unwrap();

        Self {
            id,
            engine,
            media,
            factory,
            channel,
            inbound,
            events,
        }
    }

    /// Handles everything queued so far. Returns how many events were processed.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(message) = self.inbound.try_recv() {
                self.engine.handle_signal(message, &self.media).await;
            } else if let Ok(event) = self.events.try_recv() {
                self.engine.handle_connection_event(event).await;
            } else {
                return handled;
            }
            handled += 1;
        }
    }

    pub async fn leave(&mut self) {
        self.engine.end_call().await;
        self.media.end_call();
        self.channel
            .send(SignalMessage::UserLeft(UserLeft {
                user_id: self.id.clone(),
            }))
            .await
            .unwrap();
    }

    pub fn state_of(&self, other: &Peer) -> Option<NegotiationState> {
        self.engine.state_of(&other.id)
    }

    /// This peer's fake connection towards `other`
    pub fn connection_to(&self, other: &Peer) -> FakeHandle {
        self.factory.latest(&other.id).unwrap()
    }
}

/// Pumps every peer until nobody has anything left to handle
pub async fn settle(peers: &mut [&mut Peer]) {
    for _ in 0..100 {
        let mut handled = 0;
        for peer in peers.iter_mut() {
            handled += peer.pump().await;
        }
        if handled == 0 {
            return;
        }
    }
    panic!("peers did not settle");
}
