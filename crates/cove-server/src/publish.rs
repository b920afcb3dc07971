//! The message publication pipeline shared by the WebSocket and REST
//! surfaces: moderation gate → persistence → broadcast.
//!
//! Order matters. The verdict is computed before anything is written; a
//! blocked message is rejected to its author and never persisted or
//! broadcast. A message that persists successfully is broadcast with the
//! *stored* representation (filtered content, persisted channel id), so
//! subscribers can never see content the database does not hold.

use crate::AppState;
use cove_channels::{
    create_message, delete_message, edit_message, get_channel, get_message, ChannelError,
    CreateMessageParams, Message,
};
use cove_identity::get_user;
use cove_moderation::{ModerationContext, Verdict};
use cove_realtime::MessagePayload;
use cove_types::MAX_MESSAGE_CONTENT_LEN;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Why a publication attempt was refused.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The moderation gate rejected the content. Carries the verdict so
    /// the author can be told which findings triggered the block.
    #[error("message blocked by moderation policy")]
    Blocked(Verdict),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("message {0} has been deleted")]
    MessageDeleted(String),
    #[error("user {user_id} is not the author of message {message_id}")]
    NotAuthor { user_id: String, message_id: String },
    #[error("message content exceeds maximum length of {0} bytes")]
    ContentTooLarge(usize),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ChannelError> for PublishError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::NotFound(id) => Self::ChannelNotFound(id),
            ChannelError::MessageNotFound(id) => Self::MessageNotFound(id),
            ChannelError::MessageDeleted(id) => Self::MessageDeleted(id),
            ChannelError::NotAuthor {
                user_id,
                message_id,
            } => Self::NotAuthor {
                user_id,
                message_id,
            },
            ChannelError::Database(err) => Self::Internal(err.to_string()),
        }
    }
}

/// Converts a stored message into its broadcast payload.
pub fn to_payload(message: Message) -> MessagePayload {
    MessagePayload {
        channel_id: message.channel_id,
        message_id: message.message_id,
        sender_id: message.sender_id,
        content: message.content,
        created_at: message.created_at,
        edited_at: message.edited_at,
        deleted_at: message.deleted_at,
    }
}

/// Builds the moderation context for a sender posting to a channel.
///
/// Runs on a blocking thread; both lookups hit the database.
fn moderation_context(
    conn: &rusqlite::Connection,
    channel_id: &str,
    sender_id: &str,
) -> Result<ModerationContext, PublishError> {
    let channel = get_channel(conn, channel_id)?;
    let user =
        get_user(conn, sender_id).map_err(|e| PublishError::Internal(e.to_string()))?;
    Ok(ModerationContext {
        reputation: Some(user.reputation),
        channel_kind: Some(channel.kind),
    })
}

/// Accepts a new message: moderates, persists, then broadcasts.
pub async fn submit_message(
    state: &Arc<AppState>,
    channel_id: &str,
    sender_id: &str,
    content: String,
) -> Result<Message, PublishError> {
    if content.len() > MAX_MESSAGE_CONTENT_LEN {
        return Err(PublishError::ContentTooLarge(MAX_MESSAGE_CONTENT_LEN));
    }

    let state_clone = state.clone();
    let channel = channel_id.to_string();
    let sender = sender_id.to_string();

    let message = tokio::task::spawn_blocking(move || {
        let conn = state_clone
            .pool
            .get()
            .map_err(|e| PublishError::Internal(format!("db connection failed: {e}")))?;

        let ctx = moderation_context(&conn, &channel, &sender)?;
        let verdict = state_clone.moderation.review_in_context(&content, &ctx);
        if verdict.should_block {
            tracing::info!(
                channel_id = %channel,
                sender_id = %sender,
                issues = verdict.issues.len(),
                "message blocked by moderation"
            );
            return Err(PublishError::Blocked(verdict));
        }

        let message = create_message(
            &conn,
            &CreateMessageParams {
                message_id: Uuid::new_v4().to_string(),
                channel_id: channel,
                sender_id: sender,
                content: verdict.filtered_content,
            },
        )?;
        Ok(message)
    })
    .await
    .map_err(|e| PublishError::Internal(format!("task join error: {e}")))??;

    state
        .sessions
        .publish_message(to_payload(message.clone()))
        .await;
    Ok(message)
}

/// Accepts an edit: same moderation gate as a new message, then persists
/// and broadcasts the update.
pub async fn submit_edit(
    state: &Arc<AppState>,
    message_id: &str,
    editor_id: &str,
    content: String,
) -> Result<Message, PublishError> {
    if content.len() > MAX_MESSAGE_CONTENT_LEN {
        return Err(PublishError::ContentTooLarge(MAX_MESSAGE_CONTENT_LEN));
    }

    let state_clone = state.clone();
    let message = message_id.to_string();
    let editor = editor_id.to_string();

    let updated = tokio::task::spawn_blocking(move || {
        let conn = state_clone
            .pool
            .get()
            .map_err(|e| PublishError::Internal(format!("db connection failed: {e}")))?;

        // The channel comes from the persisted message, never from the
        // client, so an edit cannot be replayed into another channel.
        let existing = get_message(&conn, &message)?;
        let ctx = moderation_context(&conn, &existing.channel_id, &editor)?;
        let verdict = state_clone.moderation.review_in_context(&content, &ctx);
        if verdict.should_block {
            tracing::info!(
                channel_id = %existing.channel_id,
                sender_id = %editor,
                issues = verdict.issues.len(),
                "edit blocked by moderation"
            );
            return Err(PublishError::Blocked(verdict));
        }

        let updated = edit_message(&conn, &message, &editor, &verdict.filtered_content)?;
        Ok(updated)
    })
    .await
    .map_err(|e| PublishError::Internal(format!("task join error: {e}")))??;

    state
        .sessions
        .publish_update(to_payload(updated.clone()))
        .await;
    Ok(updated)
}

/// Accepts a deletion: persists the soft delete, then broadcasts the
/// deletion notice to the message's channel.
pub async fn submit_delete(
    state: &Arc<AppState>,
    message_id: &str,
    deleter_id: &str,
) -> Result<Message, PublishError> {
    let state_clone = state.clone();
    let message = message_id.to_string();
    let deleter = deleter_id.to_string();

    let deleted = tokio::task::spawn_blocking(move || {
        let conn = state_clone
            .pool
            .get()
            .map_err(|e| PublishError::Internal(format!("db connection failed: {e}")))?;
        let deleted = delete_message(&conn, &message, &deleter)?;
        Ok::<Message, PublishError>(deleted)
    })
    .await
    .map_err(|e| PublishError::Internal(format!("task join error: {e}")))??;

    state
        .sessions
        .publish_delete(&deleted.channel_id, deleted.message_id.clone())
        .await;
    Ok(deleted)
}
