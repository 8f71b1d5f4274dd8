//! Call signaling handlers.
//!
//! Thin adapters from `call.*` frames to the call service. Failures are
//! reported to the originating connection as a `call_error` frame tagged
//! with one of the five wire error categories; the other party never sees
//! another user's error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::application::services::call_service::{CallError, CallService};
use crate::presentation::middleware::rate_limit::RateLimiters;
use crate::presentation::websocket::dispatcher::{ConnectionContext, HandlerError, MessageHandler};

fn require_call_id(call_id: &str) -> Result<(), HandlerError> {
    if call_id.trim().is_empty() {
        return Err(HandlerError::invalid_request("call id is required"));
    }
    Ok(())
}

fn map_call_error(error: CallError, call_id: Option<&str>) -> HandlerError {
    let mapped = match error {
        CallError::InvalidRequest(message) => HandlerError::invalid_request(message),
        CallError::NotFound => HandlerError::not_found("call not found"),
        CallError::Unauthorized(message) => HandlerError::unauthorized(message),
        CallError::InvalidStatus(message) => HandlerError::invalid_status(message),
        CallError::Storage(error) => {
            tracing::error!(error = %error, "Call storage failure");
            HandlerError::service("call service temporarily unavailable")
        }
    };
    match call_id {
        Some(id) => mapped.for_call(id),
        None => mapped,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiatePayload {
    callee_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallIdPayload {
    call_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectPayload {
    call_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndPayload {
    call_id: String,
    #[serde(default)]
    duration_seconds: Option<i64>,
}

pub struct CallInitiateHandler {
    calls: Arc<CallService>,
    limiters: Arc<RateLimiters>,
}

impl CallInitiateHandler {
    pub fn new(calls: Arc<CallService>, limiters: Arc<RateLimiters>) -> Self {
        Self { calls, limiters }
    }
}

#[async_trait]
impl MessageHandler for CallInitiateHandler {
    fn message_type(&self) -> &'static str {
        "call.initiate"
    }

    async fn handle(&self, ctx: &ConnectionContext, payload: Value) -> Result<(), HandlerError> {
        let key = format!("user:{}", ctx.user_id);
        if self.limiters.call.try_acquire(&key).is_err() {
            return Err(HandlerError::invalid_request(
                "call initiation rate limit exceeded",
            ));
        }

        let payload: InitiatePayload = serde_json::from_value(payload)
            .map_err(|e| HandlerError::invalid_request(format!("malformed payload: {e}")))?;

        let call = self
            .calls
            .initiate(ctx.user_id, payload.callee_id)
            .await
            .map_err(|e| map_call_error(e, None))?;

        // The caller learns the assigned call ID from its own incoming
        // ring view.
        ctx.reply(crate::presentation::websocket::frames::Frame::new(
            "call.ringing",
            serde_json::json!({"callId": call.id, "calleeId": call.callee_id}),
        ));
        Ok(())
    }
}

pub struct CallAcceptHandler {
    calls: Arc<CallService>,
}

impl CallAcceptHandler {
    pub fn new(calls: Arc<CallService>) -> Self {
        Self { calls }
    }
}

#[async_trait]
impl MessageHandler for CallAcceptHandler {
    fn message_type(&self) -> &'static str {
        "call.accept"
    }

    async fn handle(&self, ctx: &ConnectionContext, payload: Value) -> Result<(), HandlerError> {
        let payload: CallIdPayload = serde_json::from_value(payload)
            .map_err(|e| HandlerError::invalid_request(format!("malformed payload: {e}")))?;
        require_call_id(&payload.call_id)?;
        self.calls
            .accept(&payload.call_id, ctx.user_id)
            .await
            .map_err(|e| map_call_error(e, Some(&payload.call_id)))?;
        Ok(())
    }
}

pub struct CallRejectHandler {
    calls: Arc<CallService>,
}

impl CallRejectHandler {
    pub fn new(calls: Arc<CallService>) -> Self {
        Self { calls }
    }
}

#[async_trait]
impl MessageHandler for CallRejectHandler {
    fn message_type(&self) -> &'static str {
        "call.reject"
    }

    async fn handle(&self, ctx: &ConnectionContext, payload: Value) -> Result<(), HandlerError> {
        let payload: RejectPayload = serde_json::from_value(payload)
            .map_err(|e| HandlerError::invalid_request(format!("malformed payload: {e}")))?;
        require_call_id(&payload.call_id)?;
        self.calls
            .reject(&payload.call_id, ctx.user_id, payload.reason.as_deref())
            .await
            .map_err(|e| map_call_error(e, Some(&payload.call_id)))?;
        Ok(())
    }
}

pub struct CallEndHandler {
    calls: Arc<CallService>,
}

impl CallEndHandler {
    pub fn new(calls: Arc<CallService>) -> Self {
        Self { calls }
    }
}

#[async_trait]
impl MessageHandler for CallEndHandler {
    fn message_type(&self) -> &'static str {
        "call.end"
    }

    async fn handle(&self, ctx: &ConnectionContext, payload: Value) -> Result<(), HandlerError> {
        let payload: EndPayload = serde_json::from_value(payload)
            .map_err(|e| HandlerError::invalid_request(format!("malformed payload: {e}")))?;
        require_call_id(&payload.call_id)?;
        self.calls
            .end(&payload.call_id, ctx.user_id, payload.duration_seconds)
            .await
            .map_err(|e| map_call_error(e, Some(&payload.call_id)))?;
        Ok(())
    }
}
