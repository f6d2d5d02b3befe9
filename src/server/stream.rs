use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{
        sse::{Event as SseEvent, Sse},
        Response,
    },
};
use futures::{
    future,
    stream::{self, BoxStream},
    SinkExt, Stream, StreamExt,
};
use serde::Deserialize;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    bus::Event,
    server::AppState,
    store::{SessionStore, Subscription},
};

/// Everything one live connection holds on to. Dropping it is the only
/// cleanup path: the heartbeat task is aborted and the store listener removed.
struct ConnectionGuard {
    connection_id: String,
    heartbeat: JoinHandle<()>,
    subscription: Subscription,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.subscription.unsubscribe();
        info!(connection_id = %self.connection_id, "live stream closed");
    }
}

/// Event feed for one connected client: `connected` first, then a
/// `sessions_updated` per store mutation and a `heartbeat` every `period`.
/// Dropping the stream releases the subscription and the timer.
pub fn live_events(
    store: &SessionStore,
    period: Duration,
) -> impl Stream<Item = Event> + Send + 'static {
    let connection_id = Uuid::new_v4().simple().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let updates = tx.clone();
    let subscription = store.subscribe(move |sessions| {
        let _ = updates.send(Event::SessionsUpdated {
            sessions: sessions.to_vec(),
        });
    });

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let heartbeat = tokio::spawn(async move {
        loop {
            ticker.tick().await;
            if tx.send(Event::heartbeat()).is_err() {
                break;
            }
        }
    });

    info!(%connection_id, "live stream opened");
    let guard = ConnectionGuard {
        connection_id,
        heartbeat,
        subscription,
    };

    async_stream::stream! {
        let _guard = guard;
        yield Event::connected();
        while let Some(event) = rx.recv().await {
            yield event;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    session_id: Option<String>,
}

/// A stream for an unknown session consists of a single `error` event.
fn open_events(state: &AppState, query: &StreamQuery) -> BoxStream<'static, Event> {
    if let Some(id) = query.session_id.as_deref() {
        if state.store.get_session(id).is_none() {
            warn!(session_id = id, "live stream requested for unknown session");
            let event = Event::error(format!("session not found: {id}"));
            return stream::once(future::ready(event)).boxed();
        }
    }
    live_events(&state.store, state.heartbeat).boxed()
}

fn encode(event: Event) -> Option<String> {
    match event.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            error!(error = %e, kind = ?event.kind(), "dropping unserializable event");
            None
        }
    }
}

pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>> {
    let frames = open_events(&state, &query).filter_map(|event| {
        future::ready(encode(event).map(|json| Ok(SseEvent::default().data(json))))
    });
    Sse::new(frames)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let events = open_events(&state, &query);
        pump_socket(socket, events).await
    })
}

async fn pump_socket(socket: WebSocket, mut events: BoxStream<'static, Event>) {
    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            next = events.next() => {
                let Some(event) = next else { break };
                let Some(json) = encode(event) else { continue };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    debug!(error = %e, "socket send failed");
                    break;
                }
            }
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "socket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    let _ = sink.close().await;
}
