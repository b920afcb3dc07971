//! Cove server library logic.

pub mod api_channels;
pub mod api_sse;
pub mod api_users;
pub mod api_ws;
pub mod config;
pub mod middleware;
pub mod publish;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use cove_db::DbPool;
use cove_moderation::ModerationEngine;
use cove_realtime::ChannelSessions;
use middleware::RateLimiter;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Real-time session layer: registry, fan-out, presence.
    pub sessions: ChannelSessions,
    /// Moderation engine with its compiled rule set.
    pub moderation: Arc<ModerationEngine>,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
    /// Fixed-window request limit per client per minute.
    pub rate_limit_per_minute: u32,
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version. Used by load balancers,
/// monitoring, and CI to verify the server is running.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/api/channels",
            post(api_channels::create_channel_handler).get(api_channels::list_channels_handler),
        )
        .route(
            "/api/channels/{channelId}",
            get(api_channels::get_channel_handler),
        )
        .route(
            "/api/channels/{channelId}/messages",
            get(api_channels::get_channel_history_handler)
                .post(api_channels::post_message_handler),
        )
        .route(
            "/api/channels/{channelId}/presence",
            get(api_channels::get_presence_handler),
        )
        .route("/api/users/{userId}", get(api_users::get_user_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/api/users", post(api_users::register_user_handler))
        .merge(protected_routes)
        .route("/ws", get(api_ws::ws_handler))
        .route(
            "/events/channels/{channelId}",
            get(api_sse::channel_stream_handler),
        )
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
