//! Per-connection lifecycle glue.
//!
//! `Connecting → Subscribed → (Active)* → Closed`. A connection becomes
//! `Subscribed` when its registry entry lands (which immediately
//! rebroadcasts the channel's online count) and `Closed` when any of the
//! close paths (explicit unsubscribe, a refused fan-out write, transport
//! teardown) reaches [`disconnect`](ChannelSessions::disconnect). All of
//! them converge on the same idempotent unregister.

use crate::event::{BroadcastEvent, EventKind, MessagePayload};
use crate::fanout::{Broadcaster, DeliveryReport};
use crate::presence::PresenceSnapshot;
use crate::registry::ConnectionRegistry;
use crate::sink::EventSink;
use std::sync::Arc;

/// Orchestrates subscriptions, disconnects, and event publication over one
/// shared registry. Clones share state; store one in the application state.
#[derive(Clone)]
pub struct ChannelSessions {
    registry: ConnectionRegistry,
    broadcaster: Broadcaster,
}

impl Default for ChannelSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSessions {
    pub fn new() -> Self {
        let registry = ConnectionRegistry::new();
        Self {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
        }
    }

    /// The underlying registry, for tests and diagnostics.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Registers a connection on a channel and rebroadcasts presence.
    ///
    /// Returns the snapshot that was broadcast, which already includes the
    /// new subscriber.
    pub async fn subscribe(
        &self,
        connection_id: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        sink: Arc<dyn EventSink>,
    ) -> PresenceSnapshot {
        let channel_id = channel_id.into();
        self.registry
            .register(connection_id, sink, user_id, channel_id.as_str())
            .await;
        self.broadcast_presence(&channel_id).await
    }

    /// Removes a connection and, if it was still registered, rebroadcasts
    /// presence to its channel.
    ///
    /// Safe to call from every close path concurrently: only the call that
    /// actually removed the entry triggers a presence broadcast, the rest
    /// are no-ops. After this returns, no further event can reach the
    /// connection.
    pub async fn disconnect(&self, connection_id: &str) -> Option<PresenceSnapshot> {
        let removed = self.registry.unregister(connection_id).await?;
        Some(self.broadcast_presence(&removed.channel_id).await)
    }

    /// Current presence for a channel, without broadcasting it.
    pub async fn presence(&self, channel_id: &str) -> PresenceSnapshot {
        self.registry.presence(channel_id).await
    }

    /// Publishes a stored message to its channel. The payload must come
    /// from the persistence layer; never broadcast content that was not
    /// persisted first.
    pub async fn publish_message(&self, payload: MessagePayload) -> DeliveryReport {
        let event = BroadcastEvent::new(payload.channel_id.clone(), EventKind::Message(payload));
        self.broadcaster.publish(&event).await
    }

    /// Publishes an edited message to its channel.
    pub async fn publish_update(&self, payload: MessagePayload) -> DeliveryReport {
        let event =
            BroadcastEvent::new(payload.channel_id.clone(), EventKind::MessageUpdate(payload));
        self.broadcaster.publish(&event).await
    }

    /// Publishes a deletion notice to a channel.
    pub async fn publish_delete(
        &self,
        channel_id: &str,
        message_id: impl Into<String>,
    ) -> DeliveryReport {
        let event = BroadcastEvent::new(
            channel_id,
            EventKind::MessageDelete {
                message_id: message_id.into(),
            },
        );
        self.broadcaster.publish(&event).await
    }

    /// Publishes a typing indicator to everyone on the channel except the
    /// typist's own connections.
    pub async fn publish_typing(
        &self,
        channel_id: &str,
        user_id: &str,
        is_typing: bool,
    ) -> DeliveryReport {
        let event = BroadcastEvent::new(
            channel_id,
            EventKind::Typing {
                user_id: user_id.to_string(),
                is_typing,
            },
        );
        self.broadcaster.publish_excluding(&event, user_id).await
    }

    async fn broadcast_presence(&self, channel_id: &str) -> PresenceSnapshot {
        let snapshot = self.registry.presence(channel_id).await;
        let event = BroadcastEvent::new(
            channel_id,
            EventKind::OnlineCount {
                count: snapshot.count,
                users: snapshot.user_ids.iter().cloned().collect(),
            },
        );
        self.broadcaster.publish(&event).await;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sink_pair() -> (Arc<dyn EventSink>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel::<String>(32);
        (Arc::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("valid JSON frame"));
        }
        frames
    }

    #[tokio::test]
    async fn subscribe_broadcasts_presence_including_newcomer() {
        let sessions = ChannelSessions::new();

        let (sink_a, mut rx_a) = sink_pair();
        let snapshot = sessions.subscribe("conn-a", "alice", "general", sink_a).await;
        assert_eq!(snapshot.count, 1);

        let frames = drain(&mut rx_a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "online_count");
        assert_eq!(frames[0]["data"]["count"], 1);
        assert_eq!(frames[0]["data"]["users"][0], "alice");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_rebroadcasts_once() {
        let sessions = ChannelSessions::new();

        let (sink_a, _rx_a) = sink_pair();
        let (sink_b, mut rx_b) = sink_pair();
        sessions.subscribe("conn-a", "alice", "general", sink_a).await;
        sessions.subscribe("conn-b", "bob", "general", sink_b).await;
        drain(&mut rx_b);

        let first = sessions.disconnect("conn-a").await;
        assert_eq!(first.expect("entry removed").count, 1);
        let second = sessions.disconnect("conn-a").await;
        assert!(second.is_none(), "second disconnect is a no-op");

        let frames = drain(&mut rx_b);
        assert_eq!(frames.len(), 1, "exactly one presence rebroadcast");
        assert_eq!(frames[0]["data"]["count"], 1);
        assert_eq!(frames[0]["data"]["users"][0], "bob");
    }

    #[tokio::test]
    async fn typing_skips_typist_but_message_does_not() {
        let sessions = ChannelSessions::new();

        let (sink_a, mut rx_a) = sink_pair();
        let (sink_b, mut rx_b) = sink_pair();
        sessions.subscribe("conn-a", "alice", "general", sink_a).await;
        sessions.subscribe("conn-b", "bob", "general", sink_b).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        sessions.publish_typing("general", "alice", true).await;
        assert!(drain(&mut rx_a).is_empty(), "typist sees no typing echo");
        let bob_frames = drain(&mut rx_b);
        assert_eq!(bob_frames.len(), 1);
        assert_eq!(bob_frames[0]["type"], "typing");

        sessions
            .publish_message(MessagePayload {
                channel_id: "general".to_string(),
                message_id: "msg-1".to_string(),
                sender_id: "alice".to_string(),
                content: "hello".to_string(),
                created_at: "2025-06-01T10:00:00Z".to_string(),
                edited_at: None,
                deleted_at: None,
            })
            .await;

        let alice_frames = drain(&mut rx_a);
        assert_eq!(alice_frames.len(), 1, "sender receives their own message");
        assert_eq!(alice_frames[0]["type"], "message");
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn no_events_after_disconnect_returns() {
        let sessions = ChannelSessions::new();

        let (sink_a, mut rx_a) = sink_pair();
        sessions.subscribe("conn-a", "alice", "general", sink_a).await;
        drain(&mut rx_a);

        sessions.disconnect("conn-a").await;
        sessions.publish_typing("general", "bob", true).await;
        sessions.publish_delete("general", "msg-1").await;

        assert!(
            drain(&mut rx_a).is_empty(),
            "unregistered connection receives nothing"
        );
    }

    #[tokio::test]
    async fn update_and_delete_events_reach_subscribers() {
        let sessions = ChannelSessions::new();

        let (sink_b, mut rx_b) = sink_pair();
        sessions.subscribe("conn-b", "bob", "general", sink_b).await;
        drain(&mut rx_b);

        sessions
            .publish_update(MessagePayload {
                channel_id: "general".to_string(),
                message_id: "msg-1".to_string(),
                sender_id: "alice".to_string(),
                content: "hello (edited)".to_string(),
                created_at: "2025-06-01T10:00:00Z".to_string(),
                edited_at: Some("2025-06-01T10:01:00Z".to_string()),
                deleted_at: None,
            })
            .await;
        sessions.publish_delete("general", "msg-1").await;

        let frames = drain(&mut rx_b);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "message_update");
        assert_eq!(frames[0]["data"]["editedAt"], "2025-06-01T10:01:00Z");
        assert_eq!(frames[1]["type"], "message_delete");
        assert_eq!(frames[1]["data"]["messageId"], "msg-1");
    }
}
