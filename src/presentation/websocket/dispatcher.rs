//! Inbound frame dispatcher.
//!
//! Routes parsed frames to the handler registered for their `type`.
//! Registration happens once at startup through [`DispatcherBuilder`];
//! a duplicate registration is a wiring bug and fails startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::frames::{event_type, Frame};
use crate::infrastructure::metrics;

/// Category of a handler failure, mapped to a wire error tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    Unauthorized,
    InvalidStatus,
    Service,
}

impl ErrorKind {
    pub fn wire_tag(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "call_not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidStatus => "invalid_status",
            ErrorKind::Service => "service_error",
        }
    }
}

/// A handler failure, reported to the originating connection as a single
/// error frame. No error ever reaches the other party of an operation.
#[derive(Debug)]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
    /// Present for call signaling errors, echoed back in the payload.
    pub call_id: Option<String>,
    /// `error` for chat/typing failures, `call_error` for call signaling.
    pub frame_type: &'static str,
}

impl HandlerError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidRequest,
            message: message.into(),
            call_id: None,
            frame_type: event_type::ERROR,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unauthorized,
            message: message.into(),
            call_id: None,
            frame_type: event_type::ERROR,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
            call_id: None,
            frame_type: event_type::ERROR,
        }
    }

    pub fn invalid_status(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidStatus,
            message: message.into(),
            call_id: None,
            frame_type: event_type::ERROR,
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Service,
            message: message.into(),
            call_id: None,
            frame_type: event_type::ERROR,
        }
    }

    /// Route this error to the `call_error` frame, tagged with the call ID.
    pub fn for_call(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self.frame_type = event_type::CALL_ERROR;
        self
    }

    fn to_frame(&self) -> Frame {
        let mut payload = json!({
            "errorType": self.kind.wire_tag(),
            "message": self.message,
        });
        if let Some(call_id) = &self.call_id {
            payload["callId"] = json!(call_id);
        }
        Frame::new(self.frame_type, payload)
    }
}

/// Per-connection context handed to handlers with every frame.
pub struct ConnectionContext {
    pub user_id: i64,
    pub connection_id: uuid::Uuid,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl ConnectionContext {
    pub fn new(
        user_id: i64,
        connection_id: uuid::Uuid,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            user_id,
            connection_id,
            outbound,
        }
    }

    /// Send a frame back to this connection, best effort.
    pub fn reply(&self, frame: Frame) {
        if self.outbound.send(frame).is_err() {
            tracing::debug!(user_id = self.user_id, "Reply dropped, connection closed");
        }
    }
}

/// One inbound message type's handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The frame `type` this handler consumes.
    fn message_type(&self) -> &'static str;

    async fn handle(&self, ctx: &ConnectionContext, payload: Value) -> Result<(), HandlerError>;
}

/// Builds the routing table at startup.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Duplicate registration for the same message
    /// type fails so a wiring mistake surfaces at startup, not at runtime.
    pub fn register(mut self, handler: Arc<dyn MessageHandler>) -> anyhow::Result<Self> {
        let message_type = handler.message_type();
        if self.handlers.insert(message_type, handler).is_some() {
            anyhow::bail!("duplicate handler registered for message type '{message_type}'");
        }
        Ok(self)
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Immutable routing table from frame type to handler.
pub struct Dispatcher {
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    /// Route one frame.
    ///
    /// Unknown frame types are logged and dropped without a reply. Handler
    /// failures become a single error frame to the origin connection.
    pub async fn dispatch(&self, ctx: &ConnectionContext, frame: Frame) {
        let Some(handler) = self.handlers.get(frame.frame_type.as_str()) else {
            tracing::warn!(
                user_id = ctx.user_id,
                frame_type = %frame.frame_type,
                "Dropping frame with unknown type"
            );
            metrics::record_frame_dispatched(&frame.frame_type, "unknown");
            return;
        };

        match handler.handle(ctx, frame.payload).await {
            Ok(()) => metrics::record_frame_dispatched(&frame.frame_type, "ok"),
            Err(error) => {
                tracing::debug!(
                    user_id = ctx.user_id,
                    frame_type = %frame.frame_type,
                    error_kind = error.kind.wire_tag(),
                    message = %error.message,
                    "Handler rejected frame"
                );
                metrics::record_frame_dispatched(&frame.frame_type, "error");
                ctx.reply(error.to_frame());
            }
        }
    }

    pub fn handled_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}
