//! Presence aggregation.
//!
//! Presence is a pure projection of the registry: recomputed on demand,
//! never stored, so it cannot diverge from the connection table. Callers
//! decide when freshness matters, typically right after a subscribe or
//! disconnect.

use crate::registry::ConnectionRegistry;
use serde::Serialize;
use std::collections::BTreeSet;

/// Distinct online users for one channel at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub channel_id: String,
    /// Number of distinct users. A user with several tabs counts once.
    pub count: usize,
    /// Sorted for deterministic output.
    pub user_ids: BTreeSet<String>,
}

impl ConnectionRegistry {
    /// Computes the distinct set of users currently registered on a channel.
    pub async fn presence(&self, channel_id: &str) -> PresenceSnapshot {
        let user_ids: BTreeSet<String> = self
            .entries_for_channel(channel_id)
            .await
            .into_iter()
            .map(|entry| entry.user_id)
            .collect();

        PresenceSnapshot {
            channel_id: channel_id.to_string(),
            count: user_ids.len(),
            user_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::EventSink;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn dummy_sink() -> Arc<dyn EventSink> {
        Arc::new(mpsc::channel::<String>(8).0)
    }

    #[tokio::test]
    async fn multi_tab_user_counts_once() {
        let registry = ConnectionRegistry::new();
        registry
            .register("tab-1", dummy_sink(), "alice", "general")
            .await;
        registry
            .register("tab-2", dummy_sink(), "alice", "general")
            .await;
        registry
            .register("conn-3", dummy_sink(), "bob", "general")
            .await;

        let snapshot = registry.presence("general").await;
        assert_eq!(snapshot.count, 2, "alice's two tabs count once");
        assert!(snapshot.user_ids.contains("alice"));
        assert!(snapshot.user_ids.contains("bob"));
        // Raw registry still has all three entries.
        assert_eq!(registry.entries_for_channel("general").await.len(), 3);
    }

    #[tokio::test]
    async fn empty_channel_has_empty_snapshot() {
        let registry = ConnectionRegistry::new();
        let snapshot = registry.presence("nowhere").await;
        assert_eq!(snapshot.count, 0);
        assert!(snapshot.user_ids.is_empty());
    }

    #[tokio::test]
    async fn presence_tracks_unregistration() {
        let registry = ConnectionRegistry::new();
        registry
            .register("tab-1", dummy_sink(), "alice", "general")
            .await;
        registry
            .register("tab-2", dummy_sink(), "alice", "general")
            .await;

        registry.unregister("tab-1").await;
        assert_eq!(
            registry.presence("general").await.count,
            1,
            "one tab remains, user still present"
        );

        registry.unregister("tab-2").await;
        assert_eq!(registry.presence("general").await.count, 0);
    }
}
