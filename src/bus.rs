use crate::chat::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Live update delivered to a client, on the wire as
/// `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// The stream is open
    Connected {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Full snapshot after any store mutation
    SessionsUpdated { sessions: Vec<Session> },

    /// Liveness tick
    Heartbeat { timestamp: DateTime<Utc> },

    /// Non-fatal problem on the server or in a client transport
    Error { message: String },

    /// Raised locally by a client transport on `disconnect()`; never sent by the server
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    SessionsUpdated,
    Heartbeat,
    Error,
    Disconnected,
}

impl Event {
    pub fn connected() -> Self {
        Event::Connected {
            message: "connected to chat stream".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Event::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected { .. } => EventKind::Connected,
            Event::SessionsUpdated { .. } => EventKind::SessionsUpdated,
            Event::Heartbeat { .. } => EventKind::Heartbeat,
            Event::Error { .. } => EventKind::Error,
            Event::Disconnected => EventKind::Disconnected,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Callback)>>,
}

/// Typed listener registry shared by the client transports.
///
/// Delivery is synchronous and in registration order. A panicking callback
/// propagates to whoever called `emit`.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut listeners = self.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Some(registered) = listeners.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(lid, _)| *lid != id);
        before != registered.len()
    }

    pub fn emit(&self, event: &Event) {
        // Callbacks run without the lock so they can register or remove listeners.
        let callbacks: Vec<Callback> = self
            .lock()
            .by_kind
            .get(&event.kind())
            .map(|registered| registered.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in callbacks {
            callback(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().by_kind.get(&kind).map_or(0, Vec::len)
    }
}
