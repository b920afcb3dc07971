//! Broadcast fan-out with lazy self-pruning.
//!
//! Delivery is a synchronous sweep over the channel's registry entries:
//! serialize the event once, attempt a non-blocking write per sink, prune
//! any sink that refuses the write, keep going. One dead or slow client
//! never aborts delivery to the rest of the channel, and this sweep is the
//! only place stale connections are detected; there is no heartbeat.

use crate::event::BroadcastEvent;
use crate::registry::ConnectionRegistry;

/// What one publish accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sinks that accepted the frame.
    pub delivered: usize,
    /// Connection ids unregistered because their sink refused the write.
    pub pruned: Vec<String>,
}

/// Delivers events to every connection registered on the event's channel.
#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Publishes an event to every connection on its channel.
    pub async fn publish(&self, event: &BroadcastEvent) -> DeliveryReport {
        self.fan_out(event, None).await
    }

    /// Publishes an event to every connection on its channel except those
    /// belonging to `excluded_user`; typing indicators exclude the typist.
    pub async fn publish_excluding(
        &self,
        event: &BroadcastEvent,
        excluded_user: &str,
    ) -> DeliveryReport {
        self.fan_out(event, Some(excluded_user)).await
    }

    async fn fan_out(&self, event: &BroadcastEvent, exclude: Option<&str>) -> DeliveryReport {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(channel_id = %event.channel_id, "failed to serialize event: {e}");
                return DeliveryReport::default();
            }
        };

        // The sweep runs under the registry read guard so that a
        // concurrent unregister cannot return while a write to its sink
        // is still possible. Every write is non-blocking, so the guard is
        // held only for the duration of the sweep itself. Failures are
        // collected and unregistered after the guard drops (unregister
        // needs the write lock).
        let mut delivered = 0usize;
        let mut failed: Vec<String> = Vec::new();
        self.registry
            .for_each_on_channel(&event.channel_id, |entry| {
                if exclude == Some(entry.user_id.as_str()) {
                    return;
                }
                match entry.sink.try_send(&frame) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        // Failed write means dead or hopelessly slow
                        // client: drop the entry and keep sweeping.
                        tracing::debug!(
                            connection_id = %entry.connection_id,
                            channel_id = %entry.channel_id,
                            "pruning connection after refused write: {e}"
                        );
                        failed.push(entry.connection_id.clone());
                    }
                }
            })
            .await;

        let mut report = DeliveryReport {
            delivered,
            pruned: Vec::with_capacity(failed.len()),
        };
        for connection_id in failed {
            self.registry.unregister(&connection_id).await;
            report.pruned.push(connection_id);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::sink::{EventSink, SinkError};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// A sink that always refuses the write, as a closed transport would.
    struct BrokenSink;

    impl EventSink for BrokenSink {
        fn try_send(&self, _frame: &str) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    fn typing_event(channel: &str, user: &str) -> BroadcastEvent {
        BroadcastEvent::new(
            channel,
            EventKind::Typing {
                user_id: user.to_string(),
                is_typing: true,
            },
        )
    }

    #[tokio::test]
    async fn one_broken_sink_does_not_abort_delivery() {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone());

        let (tx_a, mut rx_a) = mpsc::channel::<String>(8);
        let (tx_b, mut rx_b) = mpsc::channel::<String>(8);
        registry.register("conn-a", Arc::new(tx_a), "alice", "general").await;
        registry.register("conn-bad", Arc::new(BrokenSink), "mallory", "general").await;
        registry.register("conn-b", Arc::new(tx_b), "bob", "general").await;

        let report = broadcaster.publish(&typing_event("general", "carol")).await;

        assert_eq!(report.delivered, 2, "healthy sinks still receive the event");
        assert_eq!(report.pruned, vec!["conn-bad".to_string()]);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        // The failing sink is gone from the registry.
        assert_eq!(registry.entries_for_channel("general").await.len(), 2);
        assert!(registry
            .entries_for_channel("general")
            .await
            .iter()
            .all(|e| e.connection_id != "conn-bad"));
    }

    #[tokio::test]
    async fn full_buffer_prunes_the_slow_consumer() {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone());

        let (tx, _rx) = mpsc::channel::<String>(1);
        registry.register("conn-slow", Arc::new(tx), "alice", "general").await;

        let first = broadcaster.publish(&typing_event("general", "bob")).await;
        assert_eq!(first.delivered, 1);

        // Buffer of one is now full and nobody drains it.
        let second = broadcaster.publish(&typing_event("general", "bob")).await;
        assert_eq!(second.delivered, 0);
        assert_eq!(second.pruned, vec!["conn-slow".to_string()]);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn typing_excludes_every_connection_of_the_typist() {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone());

        let (tx_a1, mut rx_a1) = mpsc::channel::<String>(8);
        let (tx_a2, mut rx_a2) = mpsc::channel::<String>(8);
        let (tx_b, mut rx_b) = mpsc::channel::<String>(8);
        registry.register("tab-a1", Arc::new(tx_a1), "alice", "general").await;
        registry.register("tab-a2", Arc::new(tx_a2), "alice", "general").await;
        registry.register("conn-b", Arc::new(tx_b), "bob", "general").await;

        let report = broadcaster
            .publish_excluding(&typing_event("general", "alice"), "alice")
            .await;

        assert_eq!(report.delivered, 1);
        assert!(rx_a1.try_recv().is_err(), "typist tab 1 skipped");
        assert!(rx_a2.try_recv().is_err(), "typist tab 2 skipped");
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn events_stay_scoped_to_their_channel() {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone());

        let (tx_a, mut rx_a) = mpsc::channel::<String>(8);
        let (tx_b, mut rx_b) = mpsc::channel::<String>(8);
        registry.register("conn-a", Arc::new(tx_a), "alice", "general").await;
        registry.register("conn-b", Arc::new(tx_b), "bob", "random").await;

        broadcaster.publish(&typing_event("general", "carol")).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err(), "other channels see nothing");
    }

    #[tokio::test]
    async fn frames_arrive_in_publish_order() {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry.clone());

        let (tx, mut rx) = mpsc::channel::<String>(16);
        registry.register("conn-a", Arc::new(tx), "alice", "general").await;

        for i in 0..5 {
            let event = BroadcastEvent::new(
                "general",
                EventKind::MessageDelete {
                    message_id: format!("msg-{i}"),
                },
            );
            broadcaster.publish(&event).await;
        }

        for i in 0..5 {
            let frame = rx.try_recv().expect("frame should be buffered");
            assert!(
                frame.contains(&format!("msg-{i}")),
                "expected msg-{i} in order, got {frame}"
            );
        }
    }

    #[tokio::test]
    async fn publish_to_empty_channel_is_a_noop() {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(registry);

        let report = broadcaster.publish(&typing_event("empty", "alice")).await;
        assert_eq!(report, DeliveryReport::default());
    }
}
