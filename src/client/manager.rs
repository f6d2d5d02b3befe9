use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    bus::{Event, EventBus, EventKind, ListenerId},
    client::{
        api::{SessionFeed, StreamConnector},
        polling::PollingService,
    },
    config::{PollPolicy, StreamPolicy},
    error::TransportError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActiveTransport {
    #[default]
    Idle,
    Stream,
    Polling,
}

#[derive(Default)]
struct ManagerState {
    connected: bool,
    failures: u32,
    active: ActiveTransport,
    /// Set once the stream has been given up; it is not tried again.
    fell_back: bool,
    /// Bumped by every teardown. A run loop only touches state while the
    /// epoch it was started in is current.
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn StreamConnector>,
    polling: PollingService,
    bus: EventBus,
    policy: StreamPolicy,
    state: Mutex<ManagerState>,
}

/// Client-side entry point for live updates.
///
/// Prefers the push stream and retries it a bounded number of times. Once the
/// retries are used up it switches to polling for the rest of its life. UI code
/// only sees the events on [`TransportManager::events`], whichever transport
/// produced them.
pub struct TransportManager {
    shared: Arc<Shared>,
}

impl TransportManager {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        feed: Arc<dyn SessionFeed>,
        policy: StreamPolicy,
        poll: PollPolicy,
    ) -> Self {
        let bus = EventBus::new();
        let polling = PollingService::new(feed, bus.clone(), poll);
        Self {
            shared: Arc::new(Shared {
                connector,
                polling,
                bus,
                policy,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    pub fn connect(&self) {
        let mut state = self.shared.state();

        if state.fell_back {
            if !self.shared.polling.is_polling() {
                self.shared.polling.start();
                state.active = ActiveTransport::Polling;
                state.connected = true;
            }
            return;
        }
        if state.task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("push stream already running");
            return;
        }

        state.active = ActiveTransport::Stream;
        let shared = self.shared.clone();
        state.task = Some(tokio::spawn(shared.run_stream(state.epoch)));
    }

    /// Tears down whichever transport is active and emits `disconnected`.
    /// The failure count starts over on the next `connect`.
    pub fn disconnect(&self) {
        self.shared.teardown();
        self.shared.bus.emit(&Event::Disconnected);
        info!("live updates disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().connected
    }

    pub fn active_transport(&self) -> ActiveTransport {
        self.shared.state().active
    }

    /// Consecutive push-stream failures since the last successful open.
    pub fn failures(&self) -> u32 {
        self.shared.state().failures
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.bus.on(kind, callback)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.shared.bus.off(kind, id)
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_stream(self: Arc<Self>, epoch: u64) {
        loop {
            match self.connector.open().await {
                Ok(mut events) => {
                    if !self.opened(epoch) {
                        return;
                    }
                    while let Some(item) = events.next().await {
                        match item {
                            // already announced by `opened`
                            Ok(Event::Connected { .. }) => debug!("server handshake received"),
                            Ok(event) => self.bus.emit(&event),
                            Err(TransportError::Decode(e)) => {
                                warn!(error = %e, "dropping malformed event")
                            }
                            Err(e) => {
                                warn!(error = %e, "push stream interrupted");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "push stream failed to open"),
            }

            let Some(failures) = self.failed(epoch) else {
                return;
            };
            self.bus.emit(&Event::error(format!(
                "push stream lost (attempt {failures} of {})",
                self.policy.max_attempts
            )));

            if failures < self.policy.max_attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
                continue;
            }

            self.fall_back(epoch);
            return;
        }
    }

    fn opened(&self, epoch: u64) -> bool {
        {
            let mut state = self.state();
            if state.epoch != epoch {
                return false;
            }
            state.connected = true;
            state.failures = 0;
        }
        info!("push stream connected");
        self.bus.emit(&Event::Connected {
            message: "push stream connected".to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    /// Records a failure. `None` once the manager was torn down.
    fn failed(&self, epoch: u64) -> Option<u32> {
        let mut state = self.state();
        if state.epoch != epoch {
            return None;
        }
        state.connected = false;
        state.failures += 1;
        Some(state.failures)
    }

    fn fall_back(&self, epoch: u64) {
        let mut state = self.state();
        if state.epoch != epoch {
            debug!("disconnected before falling back");
            return;
        }
        warn!(
            attempts = self.policy.max_attempts,
            "push stream abandoned, falling back to polling"
        );
        state.fell_back = true;
        state.active = ActiveTransport::Polling;
        state.connected = true;
        self.polling.start();
    }

    fn teardown(&self) {
        let task = {
            let mut state = self.state();
            state.epoch += 1;
            state.connected = false;
            state.failures = 0;
            state.active = ActiveTransport::Idle;
            state.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.polling.stop_polling();
    }
}
