//! SSE transport for the real-time core.
//!
//! Server-Sent Events cannot carry custom headers from `EventSource`, so
//! the user id rides in the query string like the WebSocket path. The
//! stream is fed by the same registry/sink mechanism as every other
//! transport: a bounded mpsc sink is registered for the channel and its
//! receiver is bridged into the response body. When the client goes away
//! the receiver drops, the next fan-out write is refused, and the entry is
//! pruned by the usual lazy sweep.

use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use cove_channels::get_channel;
use cove_identity::get_user;
use futures_util::Stream;
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

/// Same bounded buffer as the WebSocket sessions.
const SESSION_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
pub struct SseConnectParams {
    pub user: String,
}

/// Handler for `GET /events/channels/{channelId}?user=..`.
///
/// Streams the channel's event frames (message, typing, presence, edits,
/// deletes) as one SSE data line per frame.
pub async fn channel_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(channel_id): Path<String>,
    Query(params): Query<SseConnectParams>,
) -> Response {
    let state_clone = state.clone();
    let user_id = params.user.clone();
    let channel = channel_id.clone();

    let lookup = tokio::task::spawn_blocking(move || {
        let conn = state_clone
            .pool
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = get_user(&conn, &user_id).map_err(|_| StatusCode::UNAUTHORIZED)?;
        if !user.active {
            return Err(StatusCode::FORBIDDEN);
        }
        get_channel(&conn, &channel).map_err(|_| StatusCode::NOT_FOUND)?;
        Ok(user)
    })
    .await;

    let user = match lookup {
        Ok(Ok(user)) => user,
        Ok(Err(code)) => return code.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let (tx, rx) = mpsc::channel::<String>(SESSION_BUFFER);
    let connection_id = Uuid::new_v4().to_string();

    state
        .sessions
        .subscribe(
            connection_id.as_str(),
            user.user_id.as_str(),
            channel_id.as_str(),
            Arc::new(tx),
        )
        .await;

    tracing::info!(
        user_id = %user.user_id,
        channel_id = %channel_id,
        connection_id = %connection_id,
        "sse subscriber attached"
    );

    sse_response(rx).into_response()
}

fn sse_response(
    rx: mpsc::Receiver<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|frame| Ok(Event::default().data(frame)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
