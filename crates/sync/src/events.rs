// Typed signal used to hand document and presence changes to consumers.
//
// Handlers run synchronously on the emitting thread, in subscription order.
// Delivery iterates a snapshot of the handler list, so a handler may
// subscribe or unsubscribe (itself included) without deadlocking; such
// changes take effect from the next `emit`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SubscriptionId = u64;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: SubscriptionId,
    handlers: Vec<(SubscriptionId, Handler<E>)>,
}

/// Multi-subscriber event signal. Clones share the same subscriber list.
pub struct EventEmitter<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self { registry: Arc::new(Mutex::new(Registry { next_id: 1, handlers: Vec::new() })) }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` when the id was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let before = registry.handlers.len();
        registry.handlers.retain(|(handler_id, _)| *handler_id != id);
        registry.handlers.len() != before
    }

    /// Deliver `event` to every current subscriber. Returns how many ran.
    pub fn emit(&self, event: &E) -> usize {
        let handlers: Vec<Handler<E>> =
            self.registry().handlers.iter().map(|(_, handler)| Arc::clone(handler)).collect();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().handlers.len()
    }

    pub fn clear(&self) {
        self.registry().handlers.clear();
    }

    fn registry(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry) }
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").field("subscribers", &self.subscriber_count()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_subscription_order() {
        let emitter = EventEmitter::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            emitter.subscribe(move |value| seen.lock().unwrap().push(format!("{tag}:{value}")));
        }

        assert_eq!(emitter.emit(&7), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let emitter = EventEmitter::<&'static str>::new();
        let count = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&count);
        let id = emitter.subscribe(move |_| *counter.lock().unwrap() += 1);
        emitter.emit(&"a");
        assert!(emitter.unsubscribe(id));
        emitter.emit(&"b");

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(!emitter.unsubscribe(id), "second unsubscribe is a no-op");
        assert_eq!(emitter.subscriber_count(), 0);
    }

    #[test]
    fn handler_can_unsubscribe_itself_during_emit() {
        let emitter = EventEmitter::<u8>::new();
        let calls = Arc::new(Mutex::new(0));
        let own_id = Arc::new(Mutex::new(None::<SubscriptionId>));

        let inner_emitter = emitter.clone();
        let inner_calls = Arc::clone(&calls);
        let inner_id = Arc::clone(&own_id);
        let id = emitter.subscribe(move |_| {
            *inner_calls.lock().unwrap() += 1;
            if let Some(id) = *inner_id.lock().unwrap() {
                inner_emitter.unsubscribe(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        emitter.emit(&1);
        emitter.emit(&2);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn clones_share_subscribers() {
        let emitter = EventEmitter::<()>::new();
        let clone = emitter.clone();
        clone.subscribe(|_| {});
        assert_eq!(emitter.subscriber_count(), 1);
        emitter.clear();
        assert_eq!(clone.subscriber_count(), 0);
    }
}
