//! In-process event bus.
//!
//! `emit` delivers to every current subscriber in subscription order; a
//! subscriber whose receiver has been dropped is evicted on the next emit.
//! The bus keeps no history — a late subscriber sees only future events.
//! One bus instance is constructed per daemon and threaded through the
//! runner and socket server explicitly.

use pulse_core::events::DaemonEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Handle for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<DaemonEvent>,
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; events emitted after this call are delivered
    /// to the returned receiver.
    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<DaemonEvent>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().push(Subscriber { id, sender });
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().retain(|s| s.id != id);
    }

    /// Deliver an event to all current subscribers, in subscription order.
    /// Send failures (dropped receivers) evict the subscriber silently.
    pub fn emit(&self, event: &DaemonEvent) {
        self.lock()
            .retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        // A poisoned listener set would only mean a panicking subscriber
        // mid-emit; the set itself is still valid.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_all_subscribers_in_order() {
        let bus = EventBus::new();
        let (_ida, mut rx_a) = bus.subscribe();
        let (_idb, mut rx_b) = bus.subscribe();

        bus.emit(&DaemonEvent::DaemonReady { pid: 7 });
        bus.emit(&DaemonEvent::DaemonShutdown);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(
                rx.try_recv().unwrap(),
                DaemonEvent::DaemonReady { pid: 7 }
            );
            assert_eq!(rx.try_recv().unwrap(), DaemonEvent::DaemonShutdown);
        }
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe();
        bus.unsubscribe(id);
        bus.emit(&DaemonEvent::DaemonShutdown);
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropped_receiver_is_evicted_on_next_emit() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe();
        let (_id2, mut rx2) = bus.subscribe();
        drop(rx);

        bus.emit(&DaemonEvent::DaemonShutdown);
        assert_eq!(bus.subscriber_count(), 1);
        // The surviving subscriber still got the event.
        assert_eq!(rx2.try_recv().unwrap(), DaemonEvent::DaemonShutdown);
    }

    #[test]
    fn late_subscriber_sees_no_history() {
        let bus = EventBus::new();
        bus.emit(&DaemonEvent::DaemonReady { pid: 1 });
        let (_id, mut rx) = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
