//! Channel and message persistence for the Cove platform.
//!
//! Implements channel CRUD, message creation, author-only edit and soft
//! delete, and reverse-chronological history retrieval. The history query
//! doubles as the REST surface for the degraded polling client, so its
//! pagination must stay stable across soft deletes (deleted rows keep their
//! position; only the content is blanked).
//!
//! The real-time layer calls into this crate *before* broadcasting: an
//! event is only fanned out for content that persisted successfully.

use cove_types::ChannelKind;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("channel not found: {0}")]
    NotFound(String),
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("user {user_id} is not the author of message {message_id}")]
    NotAuthor {
        user_id: String,
        message_id: String,
    },
    #[error("message {0} has been deleted")]
    MessageDeleted(String),
}

/// A chat channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID for the channel (e.g. UUID).
    pub channel_id: String,
    /// Display name of the channel.
    pub name: String,
    /// Kind of the channel (public, private, dm).
    pub kind: ChannelKind,
    /// Optional topic/description.
    pub topic: Option<String>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Parameters for creating a new channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelParams {
    pub channel_id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub topic: Option<String>,
}

/// Creates a new channel.
pub fn create_channel(conn: &Connection, params: &CreateChannelParams) -> Result<Channel, ChannelError> {
    conn.execute(
        "INSERT INTO channels (channel_id, name, kind, topic) VALUES (?1, ?2, ?3, ?4)",
        params![
            params.channel_id,
            params.name,
            params.kind.as_str(),
            params.topic,
        ],
    )?;
    get_channel(conn, &params.channel_id)
}

/// Retrieves a channel by its public ID.
pub fn get_channel(conn: &Connection, channel_id: &str) -> Result<Channel, ChannelError> {
    conn.query_row(
        "SELECT id, channel_id, name, kind, topic, created_at
         FROM channels WHERE channel_id = ?1",
        [channel_id],
        map_row_to_channel,
    )
    .optional()?
    .ok_or_else(|| ChannelError::NotFound(channel_id.to_string()))
}

/// Lists all channels, ordered by name.
pub fn list_channels(conn: &Connection) -> Result<Vec<Channel>, ChannelError> {
    let mut stmt = conn.prepare(
        "SELECT id, channel_id, name, kind, topic, created_at
         FROM channels ORDER BY name ASC",
    )?;

    let rows = stmt.query_map([], map_row_to_channel)?;
    let mut channels = Vec::new();
    for row in rows {
        channels.push(row?);
    }
    Ok(channels)
}

fn map_row_to_channel(row: &Row) -> rusqlite::Result<Channel> {
    let kind_str: String = row.get(3)?;
    let kind = ChannelKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown channel kind: {kind_str}").into(),
        )
    })?;

    Ok(Channel {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        name: row.get(2)?,
        kind,
        topic: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// A message in a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID of the message.
    pub message_id: String,
    /// Public ID of the channel.
    pub channel_id: String,
    /// User ID of the sender.
    pub sender_id: String,
    /// Message content (text). Blanked on soft delete.
    pub content: String,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
    /// Last edit timestamp (ISO 8601), if edited.
    pub edited_at: Option<String>,
    /// Deletion timestamp (ISO 8601), if soft-deleted.
    pub deleted_at: Option<String>,
}

/// Parameters for creating a new message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageParams {
    pub message_id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub content: String,
}

const MESSAGE_COLUMNS: &str =
    "id, message_id, channel_id, sender_id, content, created_at, edited_at, deleted_at";

/// Creates a new message.
///
/// The channel must exist; the foreign key enforces it, but we check first
/// to return a domain error instead of a constraint violation.
pub fn create_message(
    conn: &Connection,
    params: &CreateMessageParams,
) -> Result<Message, ChannelError> {
    let _ = get_channel(conn, &params.channel_id)?;

    let sql = format!(
        "INSERT INTO messages (message_id, channel_id, sender_id, content)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING {MESSAGE_COLUMNS}"
    );

    let message = conn.query_row(
        &sql,
        params![
            params.message_id,
            params.channel_id,
            params.sender_id,
            params.content,
        ],
        map_row_to_message,
    )?;

    Ok(message)
}

/// Retrieves a message by its public ID.
pub fn get_message(conn: &Connection, message_id: &str) -> Result<Message, ChannelError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1");
    conn.query_row(&sql, [message_id], map_row_to_message)
        .optional()?
        .ok_or_else(|| ChannelError::MessageNotFound(message_id.to_string()))
}

/// Edits a message's content. Only the original author may edit, and a
/// deleted message cannot be edited.
///
/// Returns the updated message; the caller must use the *persisted*
/// channel id for any subsequent broadcast, never a client-supplied one.
pub fn edit_message(
    conn: &Connection,
    message_id: &str,
    editor_id: &str,
    content: &str,
) -> Result<Message, ChannelError> {
    let existing = get_message(conn, message_id)?;
    if existing.sender_id != editor_id {
        return Err(ChannelError::NotAuthor {
            user_id: editor_id.to_string(),
            message_id: message_id.to_string(),
        });
    }
    if existing.deleted_at.is_some() {
        return Err(ChannelError::MessageDeleted(message_id.to_string()));
    }

    let sql = format!(
        "UPDATE messages SET content = ?1, edited_at = datetime('now')
         WHERE message_id = ?2
         RETURNING {MESSAGE_COLUMNS}"
    );
    let updated = conn.query_row(&sql, params![content, message_id], map_row_to_message)?;
    Ok(updated)
}

/// Soft-deletes a message. Only the original author may delete. Idempotent:
/// deleting an already-deleted message returns it unchanged.
pub fn delete_message(
    conn: &Connection,
    message_id: &str,
    deleter_id: &str,
) -> Result<Message, ChannelError> {
    let existing = get_message(conn, message_id)?;
    if existing.sender_id != deleter_id {
        return Err(ChannelError::NotAuthor {
            user_id: deleter_id.to_string(),
            message_id: message_id.to_string(),
        });
    }
    if existing.deleted_at.is_some() {
        return Ok(existing);
    }

    let sql = format!(
        "UPDATE messages SET content = '', deleted_at = datetime('now')
         WHERE message_id = ?1
         RETURNING {MESSAGE_COLUMNS}"
    );
    let updated = conn.query_row(&sql, [message_id], map_row_to_message)?;
    Ok(updated)
}

/// Lists messages in a channel, newest first, with pagination.
///
/// If `before` is provided, returns messages created strictly before that
/// timestamp. `limit` defaults to 50 and is capped at 100. This is the
/// query the polling fallback client re-reads.
pub fn list_messages(
    conn: &Connection,
    channel_id: &str,
    before: Option<&str>,
    limit: Option<u32>,
) -> Result<Vec<Message>, ChannelError> {
    let limit = limit.unwrap_or(50).min(100);

    let sql = if before.is_some() {
        format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE channel_id = ?1 AND created_at < ?2
             ORDER BY created_at DESC, id DESC
             LIMIT {limit}"
        )
    } else {
        format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE channel_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT {limit}"
        )
    };

    let mut stmt = conn.prepare(&sql)?;

    let rows = if let Some(before_ts) = before {
        stmt.query_map(params![channel_id, before_ts], map_row_to_message)?
    } else {
        stmt.query_map(params![channel_id], map_row_to_message)?
    };

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn map_row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        message_id: row.get(1)?,
        channel_id: row.get(2)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        edited_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}
