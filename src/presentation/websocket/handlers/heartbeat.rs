//! Heartbeat handler.
//!
//! Records inbound activity for the liveness sweep and acknowledges the
//! heartbeat back to the same connection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::presentation::websocket::dispatcher::{ConnectionContext, HandlerError, MessageHandler};
use crate::presentation::websocket::frames::{event_type, Frame};
use crate::presentation::websocket::registry::ConnectionRegistry;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatAck {
    user_id: i64,
    timestamp: DateTime<Utc>,
}

pub struct HeartbeatHandler {
    registry: Arc<ConnectionRegistry>,
}

impl HeartbeatHandler {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MessageHandler for HeartbeatHandler {
    fn message_type(&self) -> &'static str {
        "heartbeat"
    }

    async fn handle(&self, ctx: &ConnectionContext, _payload: Value) -> Result<(), HandlerError> {
        self.registry.touch(ctx.user_id);
        ctx.reply(Frame::event(
            event_type::HEARTBEAT_ACK,
            &HeartbeatAck {
                user_id: ctx.user_id,
                timestamp: Utc::now(),
            },
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_heartbeat_acked_to_origin() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handler = HeartbeatHandler::new(registry);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ConnectionContext::new(7, uuid::Uuid::new_v4(), tx);

        handler.handle(&ctx, Value::Null).await.unwrap();
        let ack = rx.try_recv().unwrap();
        assert_eq!(ack.frame_type, "heartbeat.ack");
        assert_eq!(ack.payload["userId"], 7);
    }
}
