//! The connection registry: the single source of truth for who is
//! listening to what.
//!
//! All mutation goes through [`register`](ConnectionRegistry::register) and
//! [`unregister`](ConnectionRegistry::unregister); nothing else in the
//! process holds connection state. Lock scope is kept to the map operation
//! itself; guards are never held across sink writes or other awaits.

use crate::sink::EventSink;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One registered connection.
#[derive(Clone)]
pub struct ConnectionEntry {
    /// Opaque connection identifier, generated by the transport layer.
    pub connection_id: String,
    /// Authenticated user behind the connection. Several entries may share
    /// a user id (multi-tab).
    pub user_id: String,
    /// Channel the connection subscribed to.
    pub channel_id: String,
    /// Outbound sink for serialized event frames.
    pub sink: Arc<dyn EventSink>,
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("connection_id", &self.connection_id)
            .field("user_id", &self.user_id)
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

/// In-memory table of live subscriber connections.
///
/// Cheap to clone; clones share the same underlying table.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<String, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry for a connection.
    ///
    /// A connection id maps to at most one entry: re-registering an id
    /// replaces the previous entry (last writer wins). Callers are expected
    /// to generate fresh ids per connection.
    pub async fn register(
        &self,
        connection_id: impl Into<String>,
        sink: Arc<dyn EventSink>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) {
        let entry = ConnectionEntry {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            sink,
        };

        let mut entries = self.entries.write().await;
        if let Some(previous) = entries.insert(entry.connection_id.clone(), entry) {
            tracing::debug!(
                connection_id = %previous.connection_id,
                user_id = %previous.user_id,
                "replaced existing registry entry for reused connection id"
            );
        }
    }

    /// Removes a connection's entry, returning it if one existed.
    ///
    /// Idempotent: unregistering an unknown id is a silent no-op. Multiple
    /// close paths (explicit unsubscribe, failed fan-out write, transport
    /// teardown) race to call this for the same connection, and all but the
    /// first must be harmless.
    pub async fn unregister(&self, connection_id: &str) -> Option<ConnectionEntry> {
        self.entries.write().await.remove(connection_id)
    }

    /// Snapshot of the current entries for a channel.
    ///
    /// The snapshot may be stale the moment it is returned; callers must
    /// tolerate entries disappearing (or appearing) immediately after.
    pub async fn entries_for_channel(&self, channel_id: &str) -> Vec<ConnectionEntry> {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.channel_id == channel_id)
            .cloned()
            .collect()
    }

    /// Total number of live entries across all channels.
    pub async fn connection_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Runs `f` over the channel's entries while holding the read guard.
    ///
    /// This is what gives `unregister` its cancellation guarantee: an
    /// unregister call has to wait for any in-flight sweep to finish, so
    /// once it returns no further event can reach the removed connection.
    /// `f` must not block; the fan-out loop only performs non-blocking
    /// sink writes under this guard.
    pub(crate) async fn for_each_on_channel<F>(&self, channel_id: &str, mut f: F)
    where
        F: FnMut(&ConnectionEntry),
    {
        let entries = self.entries.read().await;
        for entry in entries.values().filter(|e| e.channel_id == channel_id) {
            f(entry);
        }
    }
}
