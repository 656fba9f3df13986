/// Event system for the host game
///
/// Two channels live here:
/// - `EventHub`: the synchronous game emitter. Listeners run in the same call
///   as `emit`, and an "any event" meta-channel sees every emission.
/// - `NoticeBus`: an async broadcast of host notices (broadcast/warn/error)
///   for consoles and other observers.

use crate::core::lock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Maximum number of notices buffered per subscriber
const NOTICE_BUFFER_SIZE: usize = 100;

/// Composite event key: an event name, optionally scoped to one subject
///
/// `EventKey::scoped("enter", "forest")` displays as `enter:forest` but never
/// collides with an unscoped event whose name contains a colon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl EventKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: None,
        }
    }

    pub fn scoped(name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: Some(subject.into()),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{}:{}", self.name, subject),
            None => f.write_str(&self.name),
        }
    }
}

/// An event emitted on the host, with its positional arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub key: EventKey,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl GameEvent {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            key: EventKey::new(name),
            args,
        }
    }

    pub fn scoped(name: impl Into<String>, subject: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            key: EventKey::scoped(name, subject),
            args,
        }
    }

    /// The periodic event that drives per-module scheduled checks
    pub fn tick() -> Self {
        Self::new("tick", Vec::new())
    }
}

/// Identifier returned by `EventHub::on` / `on_any`
pub type ListenerId = Uuid;

/// Host-side event listener
pub type Listener = Arc<dyn Fn(&GameEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    keyed: HashMap<EventKey, Vec<(ListenerId, Listener)>>,
    any: Vec<(ListenerId, Listener)>,
}

/// Synchronous host event emitter with an "any event" meta-channel
#[derive(Default)]
pub struct EventHub {
    listeners: Mutex<Listeners>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event key
    pub fn on(&self, key: EventKey, listener: Listener) -> ListenerId {
        let id = Uuid::new_v4();
        lock(&self.listeners)
            .keyed
            .entry(key)
            .or_default()
            .push((id, listener));
        id
    }

    /// Subscribe to every event emitted on this hub
    pub fn on_any(&self, listener: Listener) -> ListenerId {
        let id = Uuid::new_v4();
        lock(&self.listeners).any.push((id, listener));
        id
    }

    /// Remove a listener registered with `on` or `on_any`
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.any.len() + listeners.keyed.values().map(Vec::len).sum::<usize>();

        listeners.any.retain(|(lid, _)| *lid != id);
        for list in listeners.keyed.values_mut() {
            list.retain(|(lid, _)| *lid != id);
        }
        listeners.keyed.retain(|_, list| !list.is_empty());

        let after = listeners.any.len() + listeners.keyed.values().map(Vec::len).sum::<usize>();
        before != after
    }

    /// Emit an event: keyed listeners first, then the meta-channel
    ///
    /// Listeners are snapshotted before any of them runs, so a listener may
    /// emit further events or register new listeners without deadlocking.
    pub fn emit(&self, event: &GameEvent) {
        let snapshot: Vec<Listener> = {
            let listeners = lock(&self.listeners);
            listeners
                .keyed
                .get(&event.key)
                .into_iter()
                .flatten()
                .chain(listeners.any.iter())
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of listeners for a key (meta-channel excluded)
    pub fn listener_count(&self, key: &EventKey) -> usize {
        lock(&self.listeners).keyed.get(key).map_or(0, Vec::len)
    }

    /// Number of meta-channel listeners
    pub fn any_listener_count(&self) -> usize {
        lock(&self.listeners).any.len()
    }
}

/// Severity of a host notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Broadcast,
    Warn,
    Error,
}

/// A host-visible message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Broadcast channel for host notices
pub struct NoticeBus {
    sender: broadcast::Sender<Notice>,
}

impl NoticeBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTICE_BUFFER_SIZE);
        Self { sender }
    }

    /// Publish a notice to all subscribers
    pub fn publish(&self, notice: Notice) {
        // send only fails when nobody is listening
        let _ = self.sender.send(notice);
    }

    /// Subscribe to future notices
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new()
    }
}
