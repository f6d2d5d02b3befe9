use axum::{
    routing::{get, patch},
    Router,
};
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::store::SessionStore;

pub mod routes;
pub mod stream;

/// Shared state of every chat handler.
#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub heartbeat: Duration,
}

impl AppState {
    pub fn new(store: SessionStore, heartbeat: Duration) -> Self {
        Self { store, heartbeat }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/chat/sessions",
            get(routes::list_sessions).post(routes::create_session),
        )
        .route("/chat/sessions/:id", patch(routes::update_session))
        .route(
            "/chat/messages",
            get(routes::list_messages).post(routes::post_message),
        )
        .route("/chat/events", get(stream::sse_handler))
        .route("/chat/ws", get(stream::ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
