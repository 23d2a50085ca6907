use std::sync::{Arc, Weak};

use tokio::sync::mpsc::{self, error::TryRecvError};

use super::registry::Broadcaster;
use crate::types::{EntityKind, Snapshot};

/// A published snapshot as seen by subscribers. Shared between all of them.
pub type Delivery = Arc<Snapshot>;

/// Receiving side of one registration.
///
/// Dropping it releases the registration, unless a newer subscription has
/// since been made under the same session id.
pub struct Subscription {
    kind: EntityKind,
    session_id: String,
    generation: u64,
    rx: mpsc::Receiver<Delivery>,
    handoff: mpsc::UnboundedReceiver<mpsc::Receiver<Delivery>>,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    pub(super) fn new(
        kind: EntityKind,
        session_id: String,
        generation: u64,
        rx: mpsc::Receiver<Delivery>,
        handoff: mpsc::UnboundedReceiver<mpsc::Receiver<Delivery>>,
        broadcaster: Weak<Broadcaster>,
    ) -> Self {
        Self {
            kind,
            session_id,
            generation,
            rx,
            handoff,
            broadcaster,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the next snapshot. `None` once unsubscribed and drained.
    ///
    /// Cancel safe: a snapshot is never lost if the future is dropped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if let Some(snapshot) = self.rx.recv().await {
                return Some(snapshot);
            }
            // Current channel closed. Either it was resized, in which case a
            // replacement is already queued, or the registration is gone.
            match self.handoff.try_recv() {
                Ok(next) => self.rx = next,
                Err(_) => return None,
            }
        }
    }

    /// Take the next snapshot if one is buffered
    pub fn try_recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => return Some(snapshot),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => match self.handoff.try_recv() {
                    Ok(next) => self.rx = next,
                    Err(_) => return None,
                },
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.release(self.kind, &self.session_id, self.generation);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("session_id", &self.session_id)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BufferPolicy;

    #[tokio::test]
    async fn test_recv_follows_repeated_resizes_in_order() {
        let bus = Arc::new(Broadcaster::new(BufferPolicy { initial: 1, max: 16 }));
        let mut sub = bus.subscribe(EntityKind::Orders, "s1");

        // Never read while publishing: every publish past the first forces
        // a resize until the channel is large enough.
        let mut sent = Vec::new();
        for n in 0..6 {
            let snapshot = Snapshot::from(vec![crate::types::Order {
                id: n,
                ..Default::default()
            }]);
            let report = bus.publish(snapshot.clone());
            assert!(report.dropped.is_empty(), "round {n} dropped");
            sent.push(snapshot);
        }

        for expected in &sent {
            assert_eq!(*sub.recv().await.unwrap(), *expected);
        }
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_drop_releases_registration() {
        let bus = Arc::new(Broadcaster::default());
        let sub = bus.subscribe(EntityKind::Products, "s1");
        assert_eq!(bus.subscriber_count(EntityKind::Products), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(EntityKind::Products), 0);
    }

    #[test]
    fn test_drop_after_broadcaster_gone() {
        let bus = Arc::new(Broadcaster::default());
        let sub = bus.subscribe(EntityKind::Products, "s1");
        drop(bus);
        drop(sub);
    }
}
