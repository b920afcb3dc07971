//! End-to-end scenario over the session layer, transport-free.
//!
//! Follows one channel through its whole lifecycle: A subscribes, B
//! subscribes, A sends a clean message, A disconnects. Every frame each
//! side observes along the way is checked.

use cove_realtime::{ChannelSessions, MessagePayload};
use tokio::sync::mpsc;

fn sink_pair() -> (std::sync::Arc<mpsc::Sender<String>>, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel::<String>(64);
    (std::sync::Arc::new(tx), rx)
}

fn next_frame(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
    let frame = rx.try_recv().expect("expected a buffered frame");
    serde_json::from_str(&frame).expect("frame should be valid JSON")
}

fn assert_no_frame(rx: &mut mpsc::Receiver<String>) {
    assert!(rx.try_recv().is_err(), "expected no pending frame");
}

#[tokio::test]
async fn channel_lifecycle_end_to_end() {
    let sessions = ChannelSessions::new();

    // A subscribes to "general".
    let (sink_a, mut rx_a) = sink_pair();
    let snapshot = sessions.subscribe("conn-a", "A", "general", sink_a).await;
    assert_eq!(snapshot.count, 1);

    let frame = next_frame(&mut rx_a);
    assert_eq!(frame["type"], "online_count");
    assert_eq!(frame["data"]["count"], 1);
    assert_eq!(frame["data"]["users"], serde_json::json!(["A"]));

    // B subscribes; both sides see count 2.
    let (sink_b, mut rx_b) = sink_pair();
    let snapshot = sessions.subscribe("conn-b", "B", "general", sink_b).await;
    assert_eq!(snapshot.count, 2);

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = next_frame(rx);
        assert_eq!(frame["type"], "online_count");
        assert_eq!(frame["data"]["count"], 2);
        assert_eq!(frame["data"]["users"], serde_json::json!(["A", "B"]));
    }

    // A sends a clean message; both A and B receive it.
    sessions
        .publish_message(MessagePayload {
            channel_id: "general".to_string(),
            message_id: "msg-1".to_string(),
            sender_id: "A".to_string(),
            content: "hello".to_string(),
            created_at: "2025-06-01T10:00:00Z".to_string(),
            edited_at: None,
            deleted_at: None,
        })
        .await;

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = next_frame(rx);
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["data"]["content"], "hello");
        assert_eq!(frame["data"]["senderId"], "A");
        assert!(frame.get("timestamp").is_some());
    }

    // A disconnects; B sees count 1 with only B online.
    sessions.disconnect("conn-a").await;

    let frame = next_frame(&mut rx_b);
    assert_eq!(frame["type"], "online_count");
    assert_eq!(frame["data"]["count"], 1);
    assert_eq!(frame["data"]["users"], serde_json::json!(["B"]));

    // Nothing more reached A after its disconnect returned.
    assert_no_frame(&mut rx_a);
    assert_no_frame(&mut rx_b);
}

#[tokio::test]
async fn fanout_prunes_dead_subscriber_mid_scenario() {
    let sessions = ChannelSessions::new();

    let (sink_a, rx_a) = sink_pair();
    let (sink_b, mut rx_b) = sink_pair();
    sessions.subscribe("conn-a", "A", "general", sink_a).await;
    sessions.subscribe("conn-b", "B", "general", sink_b).await;

    // A's client dies without unsubscribing.
    drop(rx_a);
    while rx_b.try_recv().is_ok() {}

    // The next publish sweeps A out and still reaches B.
    let report = sessions
        .publish_message(MessagePayload {
            channel_id: "general".to_string(),
            message_id: "msg-2".to_string(),
            sender_id: "B".to_string(),
            content: "anyone here?".to_string(),
            created_at: "2025-06-01T10:05:00Z".to_string(),
            edited_at: None,
            deleted_at: None,
        })
        .await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.pruned, vec!["conn-a".to_string()]);

    let frame = next_frame(&mut rx_b);
    assert_eq!(frame["type"], "message");

    // Presence reflects the pruning on the next recomputation.
    let snapshot = sessions.presence("general").await;
    assert_eq!(snapshot.count, 1);
    assert!(snapshot.user_ids.contains("B"));
}
