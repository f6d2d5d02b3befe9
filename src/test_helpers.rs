use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::sync::mpsc;

use crate::{
    bus::{Event, EventBus, EventKind},
    chat::{Session, StatusFilter},
    client::api::{EventStream, SessionFeed, StreamConnector},
    error::TransportError,
    store::SessionStore,
};

/// Forwards every `kind` event on `bus` into a channel.
pub fn collect_events(bus: &EventBus, kind: EventKind) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.on(kind, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Reads straight from an in-process store.
pub struct StoreFeed(pub SessionStore);

#[async_trait]
impl SessionFeed for StoreFeed {
    async fn fetch_sessions(&self) -> Result<Vec<Session>, TransportError> {
        Ok(self.0.sessions(StatusFilter::All))
    }
}

/// A store feed whose first `failures` reads fail with a 503.
pub struct FlakyFeed {
    store: SessionStore,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyFeed {
    pub fn new(store: SessionStore, failures: usize) -> Self {
        Self {
            store,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFeed for FlakyFeed {
    async fn fetch_sessions(&self) -> Result<Vec<Session>, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(TransportError::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            ));
        }
        Ok(self.store.sessions(StatusFilter::All))
    }
}

/// What one `open` call of a [`ScriptedConnector`] does.
pub enum Script {
    /// The connection is refused.
    Fail,
    /// Opens, yields the items and ends.
    End(Vec<Result<Event, TransportError>>),
    /// Opens, yields the items and stays open.
    Hang(Vec<Result<Event, TransportError>>),
}

/// Plays back one [`Script`] per `open`; refuses once the script runs out.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn open(&self) -> Result<EventStream, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or(Script::Fail) {
            Script::Fail => Err(TransportError::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            )),
            Script::End(items) => Ok(stream::iter(items).boxed()),
            Script::Hang(items) => Ok(stream::iter(items).chain(stream::pending()).boxed()),
        }
    }
}
