//! Broadcast event types and the wire frame format.
//!
//! Every event frame is one JSON object:
//! `{ "type": ..., "data": ..., "timestamp": ISO-8601 }`. The five event
//! kinds form a closed enum so a payload can never be paired with the
//! wrong type tag. The channel id routes the event inside the process and
//! never appears at the top level of the frame.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Message payload carried by `message` and `message_update` events.
///
/// Field names are camelCase on the wire to match the client frame types.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub channel_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

/// The closed set of event kinds, each with its own payload shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EventKind {
    #[serde(rename = "message")]
    Message(MessagePayload),
    #[serde(rename = "message_update")]
    MessageUpdate(MessagePayload),
    #[serde(rename = "message_delete")]
    MessageDelete {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    #[serde(rename = "online_count")]
    OnlineCount { count: usize, users: Vec<String> },
}

/// One broadcast event: constructed once per publish, serialized once,
/// fanned out by reference to every matching sink.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    /// Routing key. Not part of the wire frame.
    #[serde(skip)]
    pub channel_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    /// ISO-8601 timestamp, millisecond precision.
    pub timestamp: String,
}

impl BroadcastEvent {
    /// Builds an event stamped with the current time.
    pub fn new(channel_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> MessagePayload {
        MessagePayload {
            channel_id: "general".to_string(),
            message_id: "msg-1".to_string(),
            sender_id: "alice".to_string(),
            content: "hello".to_string(),
            created_at: "2025-06-01T10:00:00Z".to_string(),
            edited_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn message_frame_has_type_data_timestamp() {
        let event = BroadcastEvent::new("general", EventKind::Message(payload()));
        let json = serde_json::to_value(&event).expect("serialize");

        assert_eq!(json["type"], "message");
        assert_eq!(json["data"]["channelId"], "general");
        assert_eq!(json["data"]["messageId"], "msg-1");
        assert_eq!(json["data"]["senderId"], "alice");
        assert!(json.get("timestamp").is_some());
        assert!(
            json.get("channelId").is_none(),
            "routing key must not leak to the top level"
        );
        // Unset optional fields are omitted, not null.
        assert!(json["data"].get("editedAt").is_none());
    }

    #[test]
    fn typing_and_delete_frames_use_spec_payloads() {
        let typing = BroadcastEvent::new(
            "general",
            EventKind::Typing {
                user_id: "alice".to_string(),
                is_typing: true,
            },
        );
        let json = serde_json::to_value(&typing).expect("serialize");
        assert_eq!(json["type"], "typing");
        assert_eq!(json["data"]["userId"], "alice");
        assert_eq!(json["data"]["isTyping"], true);

        let delete = BroadcastEvent::new(
            "general",
            EventKind::MessageDelete {
                message_id: "msg-9".to_string(),
            },
        );
        let json = serde_json::to_value(&delete).expect("serialize");
        assert_eq!(json["type"], "message_delete");
        assert_eq!(json["data"]["messageId"], "msg-9");
    }

    #[test]
    fn online_count_frame_lists_users() {
        let event = BroadcastEvent::new(
            "general",
            EventKind::OnlineCount {
                count: 2,
                users: vec!["alice".to_string(), "bob".to_string()],
            },
        );
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "online_count");
        assert_eq!(json["data"]["count"], 2);
        assert_eq!(json["data"]["users"][0], "alice");
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let event = BroadcastEvent::new(
            "general",
            EventKind::Typing {
                user_id: "alice".to_string(),
                is_typing: false,
            },
        );
        chrono::DateTime::parse_from_rfc3339(&event.timestamp).expect("valid RFC 3339 timestamp");
    }
}
