use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tokio_tungstenite::tungstenite;

/// Rejections of the chat HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: crate::chat::SessionStatus,
        to: crate::chat::SessionStatus,
    },
}

impl ApiError {
    pub fn missing(field: &str) -> Self {
        ApiError::Validation(format!("missing required field: {field}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidTransition { .. } => StatusCode::CONFLICT,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

/// Failures of the client-side transports. None of them is fatal: the
/// transports retry, fall back, or surface them as `error` events.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    #[error("socket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("malformed event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid server url {0}")]
    InvalidUrl(String),

    #[error("connection closed by server")]
    Closed,
}
