use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use std::time::Duration;
use tracing::debug;

use crate::{
    bus::Event,
    chat::{Session, SessionsResponse},
    client::sse::SseDecoder,
    error::TransportError,
};

/// Decoded push-stream frames. A `Decode` item is a single malformed frame;
/// any other error ends the stream.
pub type EventStream = BoxStream<'static, Result<Event, TransportError>>;

/// Full-state read used by the polling fallback.
#[async_trait]
pub trait SessionFeed: Send + Sync {
    async fn fetch_sessions(&self) -> Result<Vec<Session>, TransportError>;
}

/// Opens one push-stream connection.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(&self) -> Result<EventStream, TransportError>;
}

/// HTTP client for the chat server's read endpoints.
#[derive(Clone, Debug)]
pub struct HttpChatApi {
    http: reqwest::Client,
    base_url: String,
    session_id: Option<String>,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        // No overall timeout: the event stream stays open indefinitely.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_id: None,
        })
    }

    /// Scopes the event stream to one session; an unknown id is reported by
    /// the server as an `error` event.
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SessionFeed for HttpChatApi {
    async fn fetch_sessions(&self) -> Result<Vec<Session>, TransportError> {
        let response = self
            .http
            .get(self.url("/chat/sessions"))
            .query(&[("status", "all")])
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }
        let body: SessionsResponse = response.json().await?;
        Ok(body.sessions)
    }
}

#[async_trait]
impl StreamConnector for HttpChatApi {
    async fn open(&self) -> Result<EventStream, TransportError> {
        let mut request = self
            .http
            .get(self.url("/chat/events"))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(id) = &self.session_id {
            request = request.query(&[("sessionId", id)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }
        debug!(url = %response.url(), "push stream open");

        let mut body = response.bytes_stream();
        let events = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        for data in decoder.feed(&chunk) {
                            yield Event::from_json(&data).map_err(TransportError::from);
                        }
                    }
                    Err(e) => {
                        yield Err(TransportError::Http(e));
                        return;
                    }
                }
            }
            yield Err(TransportError::Closed);
        };
        Ok(events.boxed())
    }
}
