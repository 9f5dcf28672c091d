use model::events::{Event, SyncEvent};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 1024;

/// A subscription handle that can be used to unsubscribe from events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    subscriber_id: u64,
}

/// Fan-out of pipeline events to any number of bounded subscribers.
///
/// Publishing never blocks: a subscriber whose channel is full loses the
/// event, and a subscriber whose receiver was dropped is removed.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<u64, mpsc::Sender<Arc<SyncEvent>>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> (Subscription, mpsc::Receiver<Arc<SyncEvent>>) {
        self.subscribe_with_capacity(DEFAULT_CAPACITY)
    }

    pub fn subscribe_with_capacity(
        &self,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<Arc<SyncEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(subscriber_id, tx);

        debug!(subscriber_id, capacity, "Subscribed to sync events");
        (Subscription { subscriber_id }, rx)
    }

    pub fn publish(&self, event: SyncEvent) {
        let event_type = event.event_type();
        let event = Arc::new(event);
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            if subscribers.is_empty() {
                debug!(event_type, "No subscribers for event");
                return;
            }

            for (subscriber_id, sender) in subscribers.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            event_type,
                            subscriber_id, "Dropped event for slow subscriber (channel full)"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*subscriber_id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for subscriber_id in closed {
                subscribers.remove(&subscriber_id);
                debug!(subscriber_id, "Removed closed subscriber");
            }
        }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        if self
            .subscribers
            .write()
            .remove(&subscription.subscriber_id)
            .is_some()
        {
            debug!(
                subscriber_id = subscription.subscriber_id,
                "Unsubscribed from sync events"
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::core::identifiers::OperationId;

    fn cancel_event() -> SyncEvent {
        SyncEvent::CancellationRequested {
            operation_id: OperationId::from("op-1"),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let (_a, mut rx_a) = bus.subscribe();
        let (_b, mut rx_b) = bus.subscribe();

        bus.publish(cancel_event());

        assert_eq!(rx_a.recv().await.unwrap().event_type(), "sync.cancellation_requested");
        assert_eq!(rx_b.recv().await.unwrap().event_type(), "sync.cancellation_requested");
    }

    #[tokio::test]
    async fn slow_subscriber_drops_instead_of_blocking() {
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.subscribe_with_capacity(1);

        bus.publish(cancel_event());
        bus.publish(cancel_event());

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let bus = EventBus::new();
        let (sub, rx) = bus.subscribe();
        let (_keep, _rx_keep) = bus.subscribe();
        drop(rx);

        bus.publish(cancel_event());
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(sub);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
