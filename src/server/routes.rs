use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{
    chat::{MessageStatus, NewMessage, SessionStatus, SessionsResponse, StatusFilter},
    entity::{ProfileUpdate, Sender, UserProfile},
    error::ApiError,
    server::AppState,
};

type ApiResult = Result<Json<Value>, ApiError>;

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::missing(field))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    user_id: Option<String>,
    user_name: Option<String>,
    user_plan: Option<String>,
    is_logged_in: Option<bool>,
    country_code: Option<String>,
    country_name: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;
    let user_id = required(req.user_id, "userId")?;
    let defaults = UserProfile::default();
    let profile = UserProfile {
        user_name: req.user_name.unwrap_or(defaults.user_name),
        user_plan: req.user_plan.unwrap_or(defaults.user_plan),
        is_logged_in: req.is_logged_in.unwrap_or(defaults.is_logged_in),
        country_code: req.country_code.clone(),
        country_name: req.country_name.clone(),
    };

    let mut session = state.store.create_session(&user_id, profile);

    // A returning user may report a location the existing session lacks.
    let location = ProfileUpdate {
        country_code: req
            .country_code
            .filter(|code| session.profile.country_code.as_ref() != Some(code)),
        country_name: req
            .country_name
            .filter(|name| session.profile.country_name.as_ref() != Some(name)),
        ..Default::default()
    };
    if !location.is_empty() && state.store.update_session_info(&session.id, location) {
        if let Some(updated) = state.store.get_session(&session.id) {
            session = updated;
        }
    }

    info!(session_id = %session.id, user_id = %session.user_id, "session ready");
    Ok(Json(json!({ "session": session })))
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(default)]
    status: StatusFilter,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    query: Result<Query<SessionsQuery>, QueryRejection>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let Query(query) = query?;
    Ok(Json(SessionsResponse {
        sessions: state.store.sessions(query.status),
        stats: state.store.stats(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    status: Option<SessionStatus>,
    #[serde(flatten)]
    profile: ProfileUpdate,
}

/// Admin-side changes: closing a conversation or correcting profile fields.
pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateSessionRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;
    let current = state
        .store
        .get_session(&id)
        .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;

    if let Some(to) = req.status {
        if !current.status.can_become(to) {
            return Err(ApiError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }
    }

    // a rejected status change must leave the profile untouched
    if let Some(to) = req.status {
        if !state.store.update_session_status(&id, to) {
            let from = state.store.get_session(&id).map_or(current.status, |s| s.status);
            return Err(ApiError::InvalidTransition { id, from, to });
        }
        info!(session_id = %id, status = %to, "session status updated");
    }
    if !req.profile.is_empty() {
        state.store.update_session_info(&id, req.profile);
    }

    let session = state
        .store
        .get_session(&id)
        .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;
    Ok(Json(json!({ "session": session })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    session_id: Option<String>,
    text: Option<String>,
    sender: Option<String>,
    #[serde(default)]
    status: MessageStatus,
}

pub async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;
    let session_id = required(req.session_id, "sessionId")?;
    let text = required(req.text, "text")?;
    let sender: Sender = required(req.sender, "sender")?
        .parse()
        .map_err(ApiError::Validation)?;

    let message = state
        .store
        .add_message(
            &session_id,
            NewMessage {
                text,
                sender,
                status: req.status,
            },
        )
        .ok_or_else(|| ApiError::SessionNotFound(session_id.clone()))?;

    Ok(Json(json!({ "message": message })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    session_id: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let session_id = required(query.session_id, "sessionId")?;
    let messages = state
        .store
        .messages(&session_id)
        .ok_or(ApiError::SessionNotFound(session_id))?;
    Ok(Json(json!({ "messages": messages })))
}
