//! Stream event types.
//!
//! A stream session pushes a sequence of [`StreamEvent`]s to its client.
//! The event is a closed tagged union serialized with a `type` field, so a
//! JSON payload looks like `{"type":"connected","channelId":"general"}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ChannelId, Message};

/// Event kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Message,
    Heartbeat,
    ChannelGone,
}

impl EventKind {
    /// Wire name of the kind, also used as the SSE `event:` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Message => "message",
            EventKind::Heartbeat => "heartbeat",
            EventKind::ChannelGone => "channelGone",
        }
    }
}

/// An event pushed over a live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    /// Sent once, right after the subscription is established.
    #[serde(rename_all = "camelCase")]
    Connected {
        channel_id: ChannelId,
    },

    /// A newly persisted message.
    Message {
        data: Message,
    },

    /// Keepalive sent on a fixed interval.
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },

    /// The channel no longer exists. Always the last event of a stream.
    #[serde(rename_all = "camelCase")]
    ChannelGone {
        channel_id: ChannelId,
    },
}

impl StreamEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Connected { .. } => EventKind::Connected,
            StreamEvent::Message { .. } => EventKind::Message,
            StreamEvent::Heartbeat { .. } => EventKind::Heartbeat,
            StreamEvent::ChannelGone { .. } => EventKind::ChannelGone,
        }
    }

    #[must_use]
    pub fn connected(channel_id: impl Into<ChannelId>) -> Self {
        StreamEvent::Connected {
            channel_id: channel_id.into(),
        }
    }

    #[must_use]
    pub fn message(message: Message) -> Self {
        StreamEvent::Message { data: message }
    }

    /// Create a heartbeat stamped with the current time.
    #[must_use]
    pub fn heartbeat() -> Self {
        StreamEvent::Heartbeat {
            timestamp: Some(Utc::now()),
        }
    }

    #[must_use]
    pub fn channel_gone(channel_id: impl Into<ChannelId>) -> Self {
        StreamEvent::ChannelGone {
            channel_id: channel_id.into(),
        }
    }

    /// Whether the stream ends after this event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::ChannelGone { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageId;
    use serde_json::json;

    #[test]
    fn test_connected_wire_shape() {
        let value = serde_json::to_value(StreamEvent::connected("general")).unwrap();
        assert_eq!(value, json!({"type": "connected", "channelId": "general"}));
    }

    #[test]
    fn test_message_wire_shape() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "message",
            "data": {
                "id": "m1",
                "channelId": "general",
                "userId": null,
                "userName": "Sam",
                "content": "hi",
                "createdAt": "2024-05-01T12:00:00Z"
            }
        }))
        .unwrap();

        match event {
            StreamEvent::Message { data } => {
                assert_eq!(data.id, MessageId::from("m1"));
                assert_eq!(data.user_name, "Sam");
            }
            other => panic!("Expected message event, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_without_timestamp() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(event, StreamEvent::Heartbeat { timestamp: None });
        assert_eq!(event.kind().as_str(), "heartbeat");
    }

    #[test]
    fn test_channel_gone_is_terminal() {
        let event = StreamEvent::channel_gone("x");
        assert!(event.is_terminal());
        assert_eq!(event.kind().as_str(), "channelGone");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "channelGone", "channelId": "x"})
        );
        assert!(!StreamEvent::heartbeat().is_terminal());
    }
}
