//! Subscriber registry and publish path

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::subscription::{Delivery, Subscription};
use crate::types::{EntityKind, Snapshot};

/// Bounds for the shared delivery buffer capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Capacity of every channel allocated before the first growth
    pub initial: usize,
    /// Capacity never grows beyond this
    pub max: usize,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            initial: 100,
            max: 500,
        }
    }
}

/// Outcome of one publish call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that received the snapshot
    pub delivered: usize,
    /// Deliveries that succeeded only after moving to a larger channel
    pub resized: usize,
    /// Subscribers whose delivery was dropped
    pub dropped: Vec<String>,
    /// Subscribers whose receiving side was already gone
    pub stale: usize,
}

impl PublishReport {
    /// Whether any delivery was dropped
    pub fn has_drops(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// One registered subscriber
struct Slot {
    generation: u64,
    tx: mpsc::Sender<Delivery>,
    /// Passes replacement receivers to the subscription after a resize
    handoff: mpsc::UnboundedSender<mpsc::Receiver<Delivery>>,
}

impl Slot {
    /// Move this subscriber onto a channel of `capacity` and retry once.
    ///
    /// The old sender is dropped, which closes the old channel; the
    /// subscription yields what is still buffered there before switching to
    /// the new receiver, so ordering is preserved.
    fn resize_and_retry(&mut self, capacity: usize, snapshot: &Delivery) -> bool {
        let (tx, rx) = mpsc::channel(capacity);
        if self.handoff.send(rx).is_err() {
            return false;
        }
        let old = std::mem::replace(&mut self.tx, tx);
        let buffered = old.max_capacity() - old.capacity();
        drop(old);
        debug!(buffered, capacity, "moved subscriber to a larger channel");
        self.tx.try_send(Arc::clone(snapshot)).is_ok()
    }
}

struct Registry {
    subscribers: HashMap<EntityKind, HashMap<String, Slot>>,
    /// Shared capacity for newly allocated channels; never decreases
    capacity: usize,
    next_generation: u64,
}

impl Registry {
    /// Double the shared capacity up to `max`. Returns the new capacity, or
    /// `None` when it is already at the maximum.
    fn grow(&mut self, max: usize) -> Option<usize> {
        if self.capacity >= max {
            warn!(max, "cannot increase buffer capacity: already at maximum");
            return None;
        }
        let old = self.capacity;
        self.capacity = self.capacity.saturating_mul(2).min(max);
        warn!(from = old, to = self.capacity, max, "buffer capacity increased");
        Some(self.capacity)
    }

    fn slot_mut(&mut self, kind: EntityKind, session_id: &str) -> Option<&mut Slot> {
        self.subscribers.get_mut(&kind)?.get_mut(session_id)
    }
}

/// Publish/subscribe registry shared by pollers and streaming sessions.
///
/// All structural changes (subscribe, unsubscribe, channel substitution,
/// capacity growth) happen under the exclusive lock. Fan-out runs under the
/// shared lock, so publishes for different kinds proceed concurrently.
pub struct Broadcaster {
    registry: RwLock<Registry>,
    max_capacity: usize,
}

impl Broadcaster {
    /// Create a broadcaster with the given buffer bounds
    pub fn new(policy: BufferPolicy) -> Self {
        let initial = policy.initial.max(1);
        Self {
            registry: RwLock::new(Registry {
                subscribers: HashMap::new(),
                capacity: initial,
                next_generation: 0,
            }),
            max_capacity: policy.max.max(initial),
        }
    }

    /// Register `session_id` for snapshots of `kind`.
    ///
    /// Subscribing an id that is already registered replaces the previous
    /// channel; the previous [`Subscription`] then sees end of stream.
    pub fn subscribe(self: &Arc<Self>, kind: EntityKind, session_id: impl Into<String>) -> Subscription {
        let session_id = session_id.into();
        let mut registry = self.registry.write();
        let capacity = registry.capacity;
        let generation = registry.next_generation;
        registry.next_generation += 1;

        let (tx, rx) = mpsc::channel(capacity);
        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        let previous = registry.subscribers.entry(kind).or_default().insert(
            session_id.clone(),
            Slot {
                generation,
                tx,
                handoff: handoff_tx,
            },
        );
        if previous.is_some() {
            debug!(%kind, session_id, "replaced existing subscription");
        }
        debug!(%kind, session_id, capacity, "subscribed");

        Subscription::new(
            kind,
            session_id,
            generation,
            rx,
            handoff_rx,
            Arc::downgrade(self),
        )
    }

    /// Close and remove the channel registered for `session_id`.
    ///
    /// Returns `false` (and does nothing else) if it was not registered.
    pub fn unsubscribe(&self, kind: EntityKind, session_id: &str) -> bool {
        let mut registry = self.registry.write();
        let removed = registry
            .subscribers
            .get_mut(&kind)
            .and_then(|subscribers| subscribers.remove(session_id))
            .is_some();
        if removed {
            debug!(%kind, session_id, "unsubscribed");
        }
        removed
    }

    /// Remove a registration only if it is still the given generation
    pub(super) fn release(&self, kind: EntityKind, session_id: &str, generation: u64) {
        let mut registry = self.registry.write();
        if let Some(subscribers) = registry.subscribers.get_mut(&kind) {
            if subscribers
                .get(session_id)
                .is_some_and(|slot| slot.generation == generation)
            {
                subscribers.remove(session_id);
                debug!(%kind, session_id, "released dropped subscription");
            }
        }
    }

    /// Deliver `snapshot` to every subscriber of its kind without waiting.
    ///
    /// A subscriber whose channel is full gets one escalation: the shared
    /// capacity is doubled, the subscriber moves to a channel of the new size
    /// and the send is retried once. If the capacity is already at its
    /// maximum, or the retry fails, the delivery is dropped and reported.
    pub fn publish(&self, snapshot: Snapshot) -> PublishReport {
        let kind = snapshot.kind();
        let snapshot = Arc::new(snapshot);
        let mut report = PublishReport::default();
        let mut blocked = Vec::new();

        {
            let registry = self.registry.read();
            let Some(subscribers) = registry.subscribers.get(&kind) else {
                return report;
            };
            for (session_id, slot) in subscribers {
                match slot.tx.try_send(Arc::clone(&snapshot)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        blocked.push((session_id.clone(), slot.generation));
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(%kind, session_id, "subscriber receiver already closed");
                        report.stale += 1;
                    }
                }
            }
        }

        if blocked.is_empty() {
            return report;
        }

        let mut registry = self.registry.write();
        for (session_id, generation) in blocked {
            let current = registry
                .slot_mut(kind, &session_id)
                .is_some_and(|slot| slot.generation == generation);
            if !current {
                // Unsubscribed or replaced between the two locks.
                continue;
            }

            let Some(capacity) = registry.grow(self.max_capacity) else {
                warn!(%kind, subscriber = %session_id, "delivery dropped: buffer full");
                report.dropped.push(session_id);
                continue;
            };

            let delivered = registry
                .slot_mut(kind, &session_id)
                .is_some_and(|slot| slot.resize_and_retry(capacity, &snapshot));
            if delivered {
                info!(%kind, subscriber = %session_id, capacity, "delivered after buffer resize");
                report.delivered += 1;
                report.resized += 1;
            } else {
                warn!(%kind, subscriber = %session_id, capacity, "delivery dropped after resize");
                report.dropped.push(session_id);
            }
        }
        report
    }

    /// Current shared capacity for newly allocated channels
    pub fn capacity(&self) -> usize {
        self.registry.read().capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Number of registered subscribers for `kind`
    pub fn subscriber_count(&self, kind: EntityKind) -> usize {
        self.registry
            .read()
            .subscribers
            .get(&kind)
            .map_or(0, HashMap::len)
    }

    /// Capacity of the channel currently registered for `session_id`
    pub fn channel_capacity(&self, kind: EntityKind, session_id: &str) -> Option<usize> {
        self.registry
            .read()
            .subscribers
            .get(&kind)?
            .get(session_id)
            .map(|slot| slot.tx.max_capacity())
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BufferPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Order, Product};

    fn products(names: &[&str]) -> Snapshot {
        Snapshot::from(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| Product {
                    id: i as i64 + 1,
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect::<Vec<_>>(),
        )
    }

    fn broadcaster(initial: usize, max: usize) -> Arc<Broadcaster> {
        Arc::new(Broadcaster::new(BufferPolicy { initial, max }))
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = broadcaster(1, 2);
        let report = bus.publish(products(&["A"]));
        assert_eq!(report, PublishReport::default());
        assert_eq!(bus.capacity(), 1);
    }

    #[tokio::test]
    async fn test_delivers_in_publish_order() {
        let bus = broadcaster(4, 8);
        let mut sub = bus.subscribe(EntityKind::Products, "s1");

        for round in 0..10 {
            let name = format!("P{round}");
            let snapshot = products(&[name.as_str()]);
            let report = bus.publish(snapshot.clone());
            assert_eq!(report.delivered, 1);
            assert_eq!(*sub.recv().await.unwrap(), snapshot);
        }
        assert_eq!(bus.capacity(), 4);
    }

    #[tokio::test]
    async fn test_one_stall_doubles_capacity_once_and_keeps_stalled_item() {
        let bus = broadcaster(1, 4);
        let mut sub = bus.subscribe(EntityKind::Products, "slow");

        let first = products(&["A"]);
        let second = products(&["A", "B"]);
        assert_eq!(bus.publish(first.clone()).delivered, 1);

        let report = bus.publish(second.clone());
        assert_eq!(report.delivered, 1);
        assert_eq!(report.resized, 1);
        assert!(report.dropped.is_empty());
        assert_eq!(bus.capacity(), 2);
        assert_eq!(bus.channel_capacity(EntityKind::Products, "slow"), Some(2));

        assert_eq!(*sub.recv().await.unwrap(), first);
        assert_eq!(*sub.recv().await.unwrap(), second);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_drops_once_capacity_is_at_maximum() {
        let bus = broadcaster(1, 2);
        let _sub = bus.subscribe(EntityKind::Orders, "stuck");

        bus.publish(Snapshot::empty(EntityKind::Orders));
        let resized = bus.publish(Snapshot::empty(EntityKind::Orders));
        assert_eq!(resized.resized, 1);
        // New channel of 2 holds the resized delivery plus one more.
        assert_eq!(bus.publish(Snapshot::empty(EntityKind::Orders)).delivered, 1);

        let report = bus.publish(Snapshot::empty(EntityKind::Orders));
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, vec!["stuck".to_string()]);
        assert_eq!(bus.capacity(), 2);

        let again = bus.publish(Snapshot::empty(EntityKind::Orders));
        assert!(again.has_drops());
        assert_eq!(bus.capacity(), 2);
    }

    #[test]
    fn test_growth_applies_only_to_resized_channel() {
        let bus = broadcaster(1, 8);
        let _slow = bus.subscribe(EntityKind::Products, "slow");
        let _idle = bus.subscribe(EntityKind::Products, "idle");

        // Both fill up, both block on the next publish.
        bus.publish(products(&["A"]));
        let report = bus.publish(products(&["B"]));
        assert_eq!(report.resized, 2);
        // Capacity doubled once per escalation: 1 -> 2 -> 4.
        assert_eq!(bus.capacity(), 4);

        let mut sizes = vec![
            bus.channel_capacity(EntityKind::Products, "slow").unwrap(),
            bus.channel_capacity(EntityKind::Products, "idle").unwrap(),
        ];
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 4]);

        let late = bus.subscribe(EntityKind::Products, "late");
        assert_eq!(bus.channel_capacity(EntityKind::Products, late.session_id()), Some(4));
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let bus = broadcaster(1, 2);
        assert!(!bus.unsubscribe(EntityKind::Products, "never-subscribed"));
        assert_eq!(bus.subscriber_count(EntityKind::Products), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let bus = broadcaster(2, 4);
        let mut sub = bus.subscribe(EntityKind::Orders, "s1");
        bus.publish(Snapshot::from(vec![Order::default()]));

        assert!(bus.unsubscribe(EntityKind::Orders, "s1"));
        assert_eq!(bus.subscriber_count(EntityKind::Orders), 0);
        // Buffered delivery is still drained, then end of stream.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous_channel() {
        let bus = broadcaster(2, 4);
        let mut old = bus.subscribe(EntityKind::Products, "same");
        let mut new = bus.subscribe(EntityKind::Products, "same");
        assert_eq!(bus.subscriber_count(EntityKind::Products), 1);

        bus.publish(products(&["A"]));
        assert!(old.recv().await.is_none());
        assert!(new.recv().await.is_some());

        // Dropping the stale handle must not remove the newer registration.
        drop(old);
        assert_eq!(bus.subscriber_count(EntityKind::Products), 1);
        drop(new);
        assert_eq!(bus.subscriber_count(EntityKind::Products), 0);
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_delivered() {
        let bus = broadcaster(2, 4);
        let mut sub = bus.subscribe(EntityKind::Orders, "s1");
        assert_eq!(bus.publish(Snapshot::empty(EntityKind::Orders)).delivered, 1);
        assert!(sub.recv().await.unwrap().is_empty());
    }

    #[test]
    fn test_kinds_are_isolated() {
        let bus = broadcaster(2, 4);
        let mut products_sub = bus.subscribe(EntityKind::Products, "s1");
        let mut orders_sub = bus.subscribe(EntityKind::Orders, "s1");

        bus.publish(products(&["A"]));
        assert!(products_sub.try_recv().is_some());
        assert!(orders_sub.try_recv().is_none());
    }
}
