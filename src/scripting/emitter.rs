/// Per-module event emitter
///
/// Each capability surface owns one. Subscribers are kept per `EventKey` in
/// registration order. A subscriber reports whether it wants to stay
/// subscribed; removal is applied by the emitter after the call returns, never
/// from inside the subscriber.

use crate::core::{lock, EventKey, GameEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Outcome of one delivery to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Keep,
    Unsubscribe,
}

/// Identifier of a module subscription
pub type SubscriptionId = Uuid;

/// Subscriber callable
pub type Handler = Arc<dyn Fn(&GameEvent) -> Dispatch + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

/// Ordered subscriber table of one module
#[derive(Default)]
pub struct ModuleEmitter {
    subscribers: Mutex<HashMap<EventKey, Vec<Subscription>>>,
}

impl ModuleEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: EventKey, handler: Handler) -> SubscriptionId {
        let id = Uuid::new_v4();
        debug!("Subscribing {} to '{}'", id, key);
        lock(&self.subscribers)
            .entry(key)
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    pub fn unsubscribe(&self, key: &EventKey, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let Some(list) = subscribers.get_mut(key) else {
            return false;
        };

        let before = list.len();
        list.retain(|sub| sub.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(key);
        }
        removed
    }

    /// Deliver `event` to every subscriber of its key, in order
    ///
    /// The subscriber list is copied before the first call, so subscribers
    /// may subscribe further handlers; those only see later events. A
    /// subscriber that answers `Unsubscribe` is removed before the next one
    /// runs. Returns the number of subscribers invoked.
    pub fn dispatch(&self, event: &GameEvent) -> usize {
        let snapshot: Vec<Subscription> = match lock(&self.subscribers).get(&event.key) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut invoked = 0;
        for sub in snapshot {
            // an earlier subscriber in this pass may have removed it
            if !self.contains(&event.key, sub.id) {
                continue;
            }
            invoked += 1;
            if (sub.handler)(event) == Dispatch::Unsubscribe {
                debug!("Subscriber {} left '{}'", sub.id, event.key);
                self.unsubscribe(&event.key, sub.id);
            }
        }
        invoked
    }

    pub fn listener_count(&self, key: &EventKey) -> usize {
        lock(&self.subscribers).get(key).map_or(0, Vec::len)
    }

    /// Drop every subscription
    pub fn clear(&self) {
        lock(&self.subscribers).clear();
    }

    fn contains(&self, key: &EventKey, id: SubscriptionId) -> bool {
        lock(&self.subscribers)
            .get(key)
            .is_some_and(|list| list.iter().any(|sub| sub.id == id))
    }
}
