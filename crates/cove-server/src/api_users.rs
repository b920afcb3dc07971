//! REST API for user records.

use crate::api_channels::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    Json,
};
use cove_identity::{get_user, upsert_user, IdentityError, User};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum length for a display name.
const MAX_DISPLAY_NAME_LEN: usize = 128;

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    /// Optional caller-chosen id; generated when absent.
    pub user_id: Option<String>,
    pub display_name: String,
}

/// Handler for `POST /api/users`: registers (or renames) a user.
///
/// This is the only unauthenticated API route: it is how an id comes to
/// exist before it can act as a bearer token.
pub async fn register_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<Json<User>, ApiError> {
    if payload.display_name.is_empty() || payload.display_name.len() > MAX_DISPLAY_NAME_LEN {
        return Err(ApiError::BadRequest("invalid display name".to_string()));
    }
    let user_id = payload
        .user_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if user_id.is_empty() || user_id.len() > MAX_DISPLAY_NAME_LEN {
        return Err(ApiError::BadRequest("invalid user id".to_string()));
    }

    let user = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
        upsert_user(&conn, &user_id, &payload.display_name)
            .map_err(|e| ApiError::InternalServerError(e.to_string()))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))??;

    Ok(Json(user))
}

/// `GET /api/users/{userId}`
pub async fn get_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
        get_user(&conn, &user_id).map_err(|e| match e {
            IdentityError::NotFound(id) => ApiError::NotFound(format!("user {id}")),
            other => ApiError::InternalServerError(other.to_string()),
        })
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {e}")))??;

    Ok(Json(user))
}
