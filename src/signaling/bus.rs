//! Multi-subscriber fan-out of inbound signaling events

use super::{SignalKind, SignalMessage, Subscription};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::trace;

struct Subscriber {
    kinds: Option<Vec<SignalKind>>,
    tx: mpsc::UnboundedSender<SignalMessage>,
}

impl Subscriber {
    fn wants(&self, kind: SignalKind) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&kind))
    }
}

/// Ordered list of subscribers; each published event goes to every
/// interested subscriber in registration order.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        self.add(None)
    }

    pub fn subscribe_to(&self, kinds: &[SignalKind]) -> Subscription {
        self.add(Some(kinds.to_vec()))
    }

    fn add(&self, kinds: Option<Vec<SignalKind>>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Subscriber { kinds, tx });
        rx
    }

    /// Returns how many subscribers received the event. Dropped receivers are pruned.
    pub fn publish(&self, message: SignalMessage) -> usize {
        let kind = message.kind();
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.wants(kind)) {
            if subscriber.tx.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!("Published {:?} to {} subscriber(s)", kind, delivered);
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}
