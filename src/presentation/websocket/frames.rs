//! Wire frame envelope and event type constants.
//!
//! Every frame on the wire, in both directions, is a JSON object of the
//! form `{"type": "...", "payload": {...}}`. Payload DTOs use camelCase
//! field names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound event types.
pub mod event_type {
    pub const CHAT_MESSAGE: &str = "chat.message";
    pub const CONVERSATION_UPDATE: &str = "conversation.update";
    pub const MESSAGE_MENTION: &str = "message.mention";
    pub const TYPING_INDICATOR: &str = "typing.indicator";
    pub const HEARTBEAT_ACK: &str = "heartbeat.ack";
    pub const CALL_INCOMING: &str = "call.incoming";
    pub const CALL_ACCEPTED: &str = "call.accepted";
    pub const CALL_REJECTED: &str = "call.rejected";
    pub const CALL_ENDED: &str = "call.ended";
    pub const CALL_TIMEOUT: &str = "call.timeout";
    pub const ERROR: &str = "error";
    pub const CALL_ERROR: &str = "call_error";
}

/// A single WebSocket frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(frame_type: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            payload,
        }
    }

    /// Build an event frame from a serializable payload.
    ///
    /// Serialization of our own DTOs does not fail; a failure here would be
    /// a programming error, so it degrades to a null payload with a log.
    pub fn event<T: Serialize>(frame_type: impl Into<String>, payload: &T) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize event payload");
            Value::Null
        });
        Self::new(frame_type, payload)
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","payload":{"error":"service_error","message":"encoding failure"}}"#
                .to_string()
        })
    }
}
