//! Synchronous typed event bus: the single fan-in/fan-out spine wiring the
//! engine's components together.
//!
//! Snapshot-then-dispatch: `emit` takes a read lock just long enough to
//! clone the current subscriber list, drops the lock, then calls each
//! handler in subscription order on the calling task. Handlers may
//! subscribe or unsubscribe from inside a callback without deadlocking,
//! since dispatch never holds the lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use edge_types::EdgeEvent;
use tracing::warn;

pub type SubscriptionId = u64;
type Handler = dyn Fn(&EdgeEvent) + Send + Sync;

struct Subscriber {
    id: SubscriptionId,
    handler: Arc<Handler>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, invoked for every event in subscription order.
    /// Filtering by event kind is the handler's own `match`, per
    /// `EdgeEvent`'s closed tagged union.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&EdgeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.subscribers.write().expect("event bus lock poisoned");
        guard.push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut guard = self.subscribers.write().expect("event bus lock poisoned");
        guard.retain(|s| s.id != id);
    }

    /// Dispatch `event` to every current subscriber, in subscription order.
    /// A handler that panics is caught and logged so one bad subscriber
    /// cannot take down the emitting task or block its siblings.
    pub fn emit(&self, event: EdgeEvent) {
        let snapshot: Vec<Arc<Handler>> = {
            let guard = self.subscribers.read().expect("event bus lock poisoned");
            guard.iter().map(|s| s.handler.clone()).collect()
        };
        for handler in snapshot {
            let event_ref = &event;
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(event_ref);
            })) {
                warn!(?panic, tag = event.tag(), "event bus handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn handlers_fire_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe(move |_| o2.lock().unwrap().push(2));

        bus.emit(EdgeEvent::GatewayConnected { at: chrono::Utc::now() });
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        let id = bus.subscribe(move |_| *c.lock().unwrap() += 1);

        bus.emit(EdgeEvent::GatewayConnected { at: chrono::Utc::now() });
        bus.unsubscribe(id);
        bus.emit(EdgeEvent::GatewayConnected { at: chrono::Utc::now() });

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn a_panicking_handler_does_not_block_later_subscribers() {
        let bus = EventBus::new();
        bus.subscribe(|_| panic!("boom"));
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        bus.subscribe(move |_| *c.lock().unwrap() += 1);

        bus.emit(EdgeEvent::GatewayConnected { at: chrono::Utc::now() });
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
