//! WebSocket message vocabulary.
//!
//! Inbound frames are JSON objects discriminated by their `type` field.
//! Outbound control frames are discriminated by `action`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chat message or chat response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Message text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Chat session the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Start, chunk or end of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    /// Stream ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    /// Chunk text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server-reported error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Ping or pong.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Sender timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Connection acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectedMessage {
    /// Server-assigned connection ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Workspace the connection is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Status text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inbound WebSocket message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Chat message
    Chat(ChatMessage),
    /// Reply to a chat message
    ChatResponse(ChatMessage),
    /// Start of a streamed response
    StreamStart(StreamFrame),
    /// Chunk of a streamed response
    StreamChunk(StreamFrame),
    /// End of a streamed response
    StreamEnd(StreamFrame),
    /// Server-reported error
    Error(ErrorMessage),
    /// Ping
    Ping(Heartbeat),
    /// Pong
    Pong(Heartbeat),
    /// Connection acknowledgement
    Connected(ConnectedMessage),
    /// Status update
    Status(StatusMessage),
    /// Any other `type`, kept as raw JSON
    #[serde(skip)]
    Other {
        /// The `type` field
        kind: String,
        /// The whole message
        payload: Value,
    },
}

impl ServerMessage {
    /// Classify a parsed frame. Returns `None` when it has no string `type`.
    ///
    /// Frames with a known `type` whose fields do not match fall back to
    /// [`ServerMessage::Other`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ocxp_client::types::ServerMessage;
    /// use serde_json::json;
    ///
    /// let msg = ServerMessage::from_value(json!({"type": "stream_chunk", "content": "hi"})).unwrap();
    /// assert_eq!(msg.kind(), "stream_chunk");
    ///
    /// let msg = ServerMessage::from_value(json!({"type": "mission_updated", "id": "m-1"})).unwrap();
    /// assert!(matches!(msg, ServerMessage::Other { .. }));
    /// assert!(ServerMessage::from_value(json!({"no": "type"})).is_none());
    /// ```
    pub fn from_value(value: Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?.to_string();
        Some(Self::deserialize(&value).unwrap_or(Self::Other {
            kind,
            payload: value,
        }))
    }

    /// The `type` discriminator.
    pub fn kind(&self) -> &str {
        match self {
            Self::Chat(_) => "chat",
            Self::ChatResponse(_) => "chat_response",
            Self::StreamStart(_) => "stream_start",
            Self::StreamChunk(_) => "stream_chunk",
            Self::StreamEnd(_) => "stream_end",
            Self::Error(_) => "error",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Connected(_) => "connected",
            Self::Status(_) => "status",
            Self::Other { kind, .. } => kind,
        }
    }
}

/// Outbound control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a resource or topic
    Subscribe {
        /// Resource type
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        /// Resource ID
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Topic name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
    /// Keepalive ping
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn client_messages_wire_format() {
        let subscribe = ClientMessage::Subscribe {
            kind: Some("mission".into()),
            id: Some("m-1".into()),
            topic: None,
        };
        assert_eq!(
            serde_json::to_value(&subscribe).unwrap(),
            json!({"action": "subscribe", "type": "mission", "id": "m-1"})
        );
        assert_eq!(
            serde_json::to_value(ClientMessage::Ping).unwrap(),
            json!({"action": "ping"})
        );
    }

    #[test]
    fn known_messages_keep_extra_fields() {
        let msg = ServerMessage::from_value(json!({
            "type": "chat",
            "content": "hello",
            "session_id": "s-1",
            "mood": "upbeat"
        }))
        .unwrap();
        match msg {
            ServerMessage::Chat(chat) => {
                assert_eq!(chat.content.as_deref(), Some("hello"));
                assert_eq!(chat.session_id.as_deref(), Some("s-1"));
                assert_eq!(chat.extra.get("mood"), Some(&json!("upbeat")));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mismatched_fields_fall_back_to_other() {
        let msg = ServerMessage::from_value(json!({"type": "status", "status": 42})).unwrap();
        assert_eq!(msg.kind(), "status");
        assert!(matches!(msg, ServerMessage::Other { .. }));
    }
}
