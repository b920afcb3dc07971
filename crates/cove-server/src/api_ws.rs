//! WebSocket transport for the real-time core.
//!
//! One connection subscribes to exactly one channel, fixed at connect time
//! (`GET /ws?channel=..&user=..`); a user opens one socket per channel or
//! tab. The socket's outbound side is a bounded mpsc sink registered with
//! the session layer; the fan-out loop only ever performs non-blocking
//! writes into that buffer, and a forward task drains it into the socket.

use crate::publish::{submit_delete, submit_edit, submit_message, PublishError};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use cove_channels::{get_channel, Channel};
use cove_identity::get_user;
use cove_moderation::{Severity, Verdict};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Bounded per-session buffer. Beyond this the client is too slow and the
/// fan-out loop prunes the connection on its next refused write.
const SESSION_BUFFER: usize = 256;

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    /// Channel to subscribe to.
    pub channel: String,
    /// Authenticated user id. Identity is supplied by the external auth
    /// collaborator; the server verifies the record exists and is active.
    pub user: String,
}

/// Incoming WebSocket frames. The channel is implied by the connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingFrame {
    #[serde(rename = "message")]
    Message { content: String },
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "isTyping")]
        is_typing: bool,
        /// Optional draft text for keystroke-level gating.
        #[serde(default)]
        preview: Option<String>,
    },
    #[serde(rename = "edit_message")]
    EditMessage {
        #[serde(rename = "messageId")]
        message_id: String,
        content: String,
    },
    #[serde(rename = "delete_message")]
    DeleteMessage {
        #[serde(rename = "messageId")]
        message_id: String,
    },
}

/// Frames sent only to this connection's author, outside the broadcast
/// wire contract.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DirectFrame {
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "message_rejected")]
    MessageRejected {
        issues: Vec<String>,
        severity: Severity,
    },
}

/// Sends a serialized direct frame to this connection's own sink.
fn send_direct(tx: &mpsc::Sender<String>, frame: DirectFrame) {
    match serde_json::to_string(&frame) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to send direct frame to client: {e}");
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize direct frame: {e}");
        }
    }
}

fn send_rejection(tx: &mpsc::Sender<String>, verdict: Verdict) {
    send_direct(
        tx,
        DirectFrame::MessageRejected {
            issues: verdict.issues,
            severity: verdict.severity,
        },
    );
}

fn send_publish_error(tx: &mpsc::Sender<String>, error: PublishError) {
    match error {
        PublishError::Blocked(verdict) => send_rejection(tx, verdict),
        PublishError::Internal(msg) => {
            tracing::error!("publish failed: {msg}");
            send_direct(
                tx,
                DirectFrame::Error {
                    message: "internal error".to_string(),
                },
            );
        }
        other => send_direct(
            tx,
            DirectFrame::Error {
                message: other.to_string(),
            },
        ),
    }
}

/// WebSocket handler: `GET /ws?channel=..&user=..`.
///
/// Auth outcomes (success and failure) are logged with the remote address.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    let state_clone = state.clone();
    let user_id = params.user.clone();
    let channel_id = params.channel.clone();

    let lookup = tokio::task::spawn_blocking(move || {
        let conn = state_clone
            .pool
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = get_user(&conn, &user_id).map_err(|_| StatusCode::UNAUTHORIZED)?;
        if !user.active {
            return Err(StatusCode::FORBIDDEN);
        }
        let channel = get_channel(&conn, &channel_id).map_err(|_| StatusCode::NOT_FOUND)?;
        Ok((user, channel))
    })
    .await;

    match lookup {
        Ok(Ok((user, channel))) => {
            tracing::info!(
                user_id = %user.user_id,
                channel_id = %channel.channel_id,
                remote_addr = %addr,
                "websocket subscribe accepted"
            );
            ws.on_upgrade(move |socket| handle_socket(socket, state, user.user_id, channel))
        }
        Ok(Err(code)) => {
            tracing::warn!(
                user_id = %params.user,
                channel_id = %params.channel,
                remote_addr = %addr,
                status = %code,
                "websocket subscribe refused"
            );
            code.into_response()
        }
        Err(_) => {
            tracing::warn!(remote_addr = %addr, "websocket auth internal error");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Drives one connection's lifecycle: register, dispatch inbound frames,
/// and converge every exit path on the same idempotent disconnect.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String, channel: Channel) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(SESSION_BUFFER);
    let connection_id = Uuid::new_v4().to_string();

    // Register first: the presence broadcast triggered by subscribe must
    // already include this connection.
    state
        .sessions
        .subscribe(
            connection_id.as_str(),
            user_id.as_str(),
            channel.channel_id.as_str(),
            Arc::new(tx.clone()),
        )
        .await;

    // Forward buffered frames into the socket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(AxumMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                let frame = match serde_json::from_str::<IncomingFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(_) => {
                        tracing::warn!(
                            user_id = %user_id,
                            "failed to parse incoming WebSocket frame"
                        );
                        send_direct(
                            &tx,
                            DirectFrame::Error {
                                message: "invalid frame format".to_string(),
                            },
                        );
                        continue;
                    }
                };

                match frame {
                    IncomingFrame::Message { content } => {
                        match submit_message(&state, &channel.channel_id, &user_id, content).await
                        {
                            Ok(_) => {} // already broadcast by the pipeline
                            Err(e) => send_publish_error(&tx, e),
                        }
                    }
                    IncomingFrame::Typing { is_typing, preview } => {
                        // Keystroke-level gate: a draft that trips the
                        // severe-term check produces no typing event.
                        if let Some(preview) = preview {
                            if !state.moderation.quick_typing_check(&preview) {
                                tracing::debug!(
                                    user_id = %user_id,
                                    channel_id = %channel.channel_id,
                                    "typing indicator suppressed by quick check"
                                );
                                continue;
                            }
                        }
                        state
                            .sessions
                            .publish_typing(&channel.channel_id, &user_id, is_typing)
                            .await;
                    }
                    IncomingFrame::EditMessage {
                        message_id,
                        content,
                    } => match submit_edit(&state, &message_id, &user_id, content).await {
                        Ok(_) => {}
                        Err(e) => send_publish_error(&tx, e),
                    },
                    IncomingFrame::DeleteMessage { message_id } => {
                        match submit_delete(&state, &message_id, &user_id).await {
                            Ok(_) => {}
                            Err(e) => send_publish_error(&tx, e),
                        }
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    // All close paths converge here; disconnect is idempotent, so racing
    // with a fan-out prune of the same connection id is harmless.
    state.sessions.disconnect(&connection_id).await;
    send_task.abort();
}
