use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    bus::{Event, EventBus, EventKind, ListenerId},
    chat::Session,
    client::api::SessionFeed,
    config::{PollDiff, PollPolicy},
};

impl PollDiff {
    fn changed(self, last: Option<&[Session]>, next: &[Session]) -> bool {
        match (self, last) {
            (_, None) => true,
            (PollDiff::Count, Some(last)) => last.len() != next.len(),
            (PollDiff::Content, Some(last)) => last != next,
        }
    }
}

/// Lowest common denominator transport: re-reads every session on a timer
/// and emits `sessions_updated` when the snapshot changed.
///
/// With [`PollDiff::Count`] a change that keeps the number of sessions the
/// same (a new message, a status change) goes unnoticed until the count moves.
pub struct PollingService {
    feed: Arc<dyn SessionFeed>,
    bus: EventBus,
    policy: PollPolicy,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingService {
    pub fn new(feed: Arc<dyn SessionFeed>, bus: EventBus, policy: PollPolicy) -> Self {
        Self {
            feed,
            bus,
            policy,
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts polling every `interval`. Does nothing if already polling.
    pub fn start_polling(&self, interval: Duration) {
        let mut task = self.task();
        if task.is_some() {
            debug!("polling already running");
            return;
        }

        info!(interval_ms = interval.as_millis() as u64, diff = ?self.policy.diff, "polling started");
        let feed = self.feed.clone();
        let bus = self.bus.clone();
        let diff = self.policy.diff;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<Vec<Session>> = None;

            loop {
                ticker.tick().await;
                match feed.fetch_sessions().await {
                    Ok(sessions) => {
                        if diff.changed(last.as_deref(), &sessions) {
                            debug!(count = sessions.len(), "poll found changes");
                            last = Some(sessions.clone());
                            bus.emit(&Event::SessionsUpdated { sessions });
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "poll failed");
                        bus.emit(&Event::error(format!("polling failed: {e}")));
                    }
                }
            }
        }));
    }

    /// Starts polling at the configured interval.
    pub fn start(&self) {
        self.start_polling(self.policy.interval);
    }

    /// Stops the timer. Safe to call when not polling.
    pub fn stop_polling(&self) {
        if let Some(task) = self.task().take() {
            task.abort();
            info!("polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.task().is_some()
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.on(kind, callback)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.bus.off(kind, id)
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }
}

impl Drop for PollingService {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
