use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use reqwest::Url;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::{
    bus::{Event, EventBus, EventKind, ListenerId},
    config::SocketPolicy,
    error::TransportError,
};

/// Delay before reconnect attempt number `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt
}

/// Derives the socket endpoint from the server's HTTP base url.
pub fn socket_url(base_url: &str, session_id: Option<&str>) -> Result<String, TransportError> {
    let mut url =
        Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "{base_url}: unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(base_url.to_string()))?;
    url.set_path("/chat/ws");
    url.set_query(None);
    if let Some(id) = session_id {
        url.query_pairs_mut().append_pair("sessionId", id);
    }
    Ok(url.to_string())
}

#[derive(Default)]
struct SocketState {
    connected: bool,
    attempts: u32,
    /// Bumped by `stop`; a run loop from an earlier epoch exits quietly.
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    url: String,
    policy: SocketPolicy,
    bus: EventBus,
    state: Mutex<SocketState>,
}

/// WebSocket client for `/chat/ws` with its own bounded reconnect policy.
/// Does not fall back to polling.
pub struct SocketTransport {
    shared: Arc<Shared>,
}

impl SocketTransport {
    pub fn new(
        base_url: &str,
        session_id: Option<&str>,
        policy: SocketPolicy,
    ) -> Result<Self, TransportError> {
        let url = socket_url(base_url, session_id)?;
        Ok(Self {
            shared: Arc::new(Shared {
                url,
                policy,
                bus: EventBus::new(),
                state: Mutex::new(SocketState::default()),
            }),
        })
    }

    pub fn connect(&self) {
        let mut state = self.shared.state();
        if state.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        state.attempts = 0;
        let shared = self.shared.clone();
        state.task = Some(tokio::spawn(shared.run(state.epoch)));
    }

    pub fn disconnect(&self) {
        self.shared.stop();
        self.shared.bus.emit(&Event::Disconnected);
        info!(url = %self.shared.url, "socket disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().connected
    }

    /// Failed attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.shared.state().attempts
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

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stop(&self) {
        let task = {
            let mut state = self.state();
            state.epoch += 1;
            state.connected = false;
            state.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
    }

    async fn run(self: Arc<Self>, epoch: u64) {
        loop {
            let reason = match self.session(epoch).await {
                Ok(()) => TransportError::Closed,
                Err(e) => e,
            };

            let attempt = {
                let mut state = self.state();
                if state.epoch != epoch {
                    return;
                }
                state.connected = false;
                state.attempts += 1;
                state.attempts
            };
            warn!(url = %self.url, attempt, error = %reason, "socket lost");
            self.bus
                .emit(&Event::error(format!("socket lost: {reason}")));

            if attempt >= self.policy.max_attempts {
                error!(url = %self.url, attempts = attempt, "socket reconnect attempts exhausted");
                self.bus.emit(&Event::error(format!(
                    "socket gave up after {attempt} attempts"
                )));
                return;
            }
            tokio::time::sleep(backoff_delay(self.policy.backoff_base, attempt)).await;
        }
    }

    /// One connection, from handshake until the socket closes.
    async fn session(&self, epoch: u64) -> Result<(), TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        {
            let mut state = self.state();
            if state.epoch != epoch {
                return Ok(());
            }
            state.connected = true;
            state.attempts = 0;
        }
        info!(url = %self.url, "socket connected");
        self.bus.emit(&Event::Connected {
            message: "socket connected".to_string(),
            timestamp: Utc::now(),
        });

        let (_write, mut read) = ws.split();
        while let Some(frame) = read.next().await {
            match frame? {
                Message::Text(text) => match Event::from_json(text.as_str()) {
                    Ok(Event::Connected { .. }) => debug!("server handshake received"),
                    Ok(event) => self.bus.emit(&event),
                    Err(e) => warn!(error = %e, "dropping malformed event"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}
