//! User registry for the Cove platform.
//!
//! Manages the `users` table: who exists, whether they may connect, and
//! their reputation score. Authentication itself is external; the server
//! trusts the user id it is handed and only verifies the record here.
//! Reputation feeds the moderation context (high-reputation users get a
//! lighter touch, low-reputation users a stricter one).

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during user registry operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("reputation must be in 0..=100, got {0}")]
    ReputationOutOfRange(u32),
}

/// A platform user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID for the user.
    pub user_id: String,
    /// Display name shown in channels.
    pub display_name: String,
    /// Reputation score in 0..=100. New users start at 50.
    pub reputation: u8,
    /// Whether the user may connect.
    pub active: bool,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Creates a user, or updates the display name if the id already exists.
pub fn upsert_user(
    conn: &Connection,
    user_id: &str,
    display_name: &str,
) -> Result<User, IdentityError> {
    conn.execute(
        "INSERT INTO users (user_id, display_name) VALUES (?1, ?2)
         ON CONFLICT (user_id) DO UPDATE SET display_name = excluded.display_name",
        params![user_id, display_name],
    )?;
    get_user(conn, user_id)
}

/// Retrieves a user by public id.
pub fn get_user(conn: &Connection, user_id: &str) -> Result<User, IdentityError> {
    conn.query_row(
        "SELECT id, user_id, display_name, reputation, active, created_at
         FROM users WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                user_id: row.get(1)?,
                display_name: row.get(2)?,
                reputation: row.get::<_, u32>(3)? as u8,
                active: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| IdentityError::NotFound(user_id.to_string()))
}

/// Sets a user's reputation score.
pub fn set_reputation(
    conn: &Connection,
    user_id: &str,
    reputation: u32,
) -> Result<(), IdentityError> {
    if reputation > 100 {
        return Err(IdentityError::ReputationOutOfRange(reputation));
    }
    let changed = conn.execute(
        "UPDATE users SET reputation = ?1 WHERE user_id = ?2",
        params![reputation, user_id],
    )?;
    if changed == 0 {
        return Err(IdentityError::NotFound(user_id.to_string()));
    }
    Ok(())
}

/// Deactivates a user. Deactivated users fail the auth lookup.
pub fn deactivate_user(conn: &Connection, user_id: &str) -> Result<(), IdentityError> {
    let changed = conn.execute("UPDATE users SET active = 0 WHERE user_id = ?1", [user_id])?;
    if changed == 0 {
        return Err(IdentityError::NotFound(user_id.to_string()));
    }
    Ok(())
}
