//! REST API for channels: CRUD, message history, and request/response
//! publication.
//!
//! The history and publish endpoints are the whole surface the degraded
//! polling client consumes: it re-reads `GET .../messages` instead of
//! holding a push connection, and the server core does not change to
//! support it.

use crate::middleware::IdentityContext;
use crate::publish::{submit_message, PublishError};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cove_channels::{
    create_channel, get_channel, list_channels, list_messages, Channel, CreateChannelParams,
    Message,
};
use cove_moderation::Verdict;
use cove_types::ChannelKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Maximum length for a channel name.
const MAX_CHANNEL_NAME_LEN: usize = 256;
/// Maximum length for a channel topic.
const MAX_TOPIC_LEN: usize = 1024;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Moderation rejection. Not an error in the taxonomy but a policy
    /// decision surfaced to the author with the finding summary.
    #[error("message blocked by moderation policy")]
    Blocked(Verdict),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Blocked(verdict) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({
                    "error": "message blocked by moderation policy",
                    "issues": verdict.issues,
                    "severity": verdict.severity,
                }),
            ),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg }))
            }
            ApiError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, serde_json::json!({ "error": msg }))
            }
            ApiError::InternalServerError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": msg }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<PublishError> for ApiError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Blocked(verdict) => Self::Blocked(verdict),
            PublishError::ChannelNotFound(id) => Self::NotFound(format!("channel {id}")),
            PublishError::MessageNotFound(id) => Self::NotFound(format!("message {id}")),
            PublishError::MessageDeleted(id) => {
                Self::BadRequest(format!("message {id} has been deleted"))
            }
            PublishError::NotAuthor { message_id, .. } => {
                Self::Forbidden(format!("not the author of message {message_id}"))
            }
            PublishError::ContentTooLarge(max) => {
                Self::BadRequest(format!("content exceeds maximum length of {max} bytes"))
            }
            PublishError::Internal(msg) => Self::InternalServerError(msg),
        }
    }
}

/// Maps a [`cove_channels::ChannelError`] onto an [`ApiError`], logging
/// anything that is not a plain not-found.
fn channel_err_to_api(e: cove_channels::ChannelError) -> ApiError {
    match e {
        cove_channels::ChannelError::NotFound(id) => ApiError::NotFound(format!("channel {id}")),
        cove_channels::ChannelError::MessageNotFound(id) => {
            ApiError::NotFound(format!("message {id}"))
        }
        err => {
            tracing::error!(error = %err, "channel operation failed");
            ApiError::InternalServerError("channel operation failed".to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ChannelKind,
    pub topic: Option<String>,
}

fn default_kind() -> ChannelKind {
    ChannelKind::Public
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub channel_id: String,
    pub count: usize,
    pub users: Vec<String>,
}

/// `POST /api/channels`
pub async fn create_channel_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateChannelRequest>,
) -> Result<Json<Channel>, ApiError> {
    if payload.name.is_empty() || payload.name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(ApiError::BadRequest("invalid channel name".to_string()));
    }
    if let Some(ref topic) = payload.topic {
        if topic.len() > MAX_TOPIC_LEN {
            return Err(ApiError::BadRequest("topic too long".to_string()));
        }
    }

    let params = CreateChannelParams {
        channel_id: Uuid::new_v4().to_string(),
        name: payload.name,
        kind: payload.kind,
        topic: payload.topic,
    };

    let channel = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
        create_channel(&conn, &params).map_err(channel_err_to_api)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))??;

    Ok(Json(channel))
}

/// `GET /api/channels`
pub async fn list_channels_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let channels = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
        list_channels(&conn).map_err(channel_err_to_api)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))??;

    Ok(Json(channels))
}

/// `GET /api/channels/{channelId}`
pub async fn get_channel_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    let channel = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
        get_channel(&conn, &channel_id).map_err(channel_err_to_api)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))??;

    Ok(Json(channel))
}

/// `GET /api/channels/{channelId}/messages`: history, newest first.
///
/// The polling fallback client calls this repeatedly with `before` cursors;
/// no push transport is involved.
pub async fn get_channel_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
        // Distinguish "unknown channel" from "no messages yet".
        let _ = get_channel(&conn, &channel_id).map_err(channel_err_to_api)?;
        list_messages(&conn, &channel_id, params.before.as_deref(), params.limit)
            .map_err(channel_err_to_api)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))??;

    Ok(Json(messages))
}

/// `POST /api/channels/{channelId}/messages`: request/response
/// publication. Runs the same moderate → persist → broadcast pipeline as
/// the WebSocket path, so polling clients still fan out to push clients.
pub async fn post_message_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(IdentityContext(user)): Extension<IdentityContext>,
    Path(channel_id): Path<String>,
    Json(payload): Json<PostMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let message = submit_message(&state, &channel_id, &user.user_id, payload.content).await?;
    Ok(Json(message))
}

/// `GET /api/channels/{channelId}/presence`: distinct online users.
pub async fn get_presence_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Json<PresenceResponse>, ApiError> {
    // Verify the channel exists so unknown ids are 404, not silently empty.
    {
        let state = state.clone();
        let channel_id = channel_id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = state
                .pool
                .get()
                .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
            get_channel(&conn, &channel_id).map_err(channel_err_to_api)
        })
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))??;
    }

    let snapshot = state.sessions.presence(&channel_id).await;
    Ok(Json(PresenceResponse {
        channel_id: snapshot.channel_id,
        count: snapshot.count,
        users: snapshot.user_ids.into_iter().collect(),
    }))
}
