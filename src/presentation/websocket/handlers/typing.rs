//! Typing indicator handlers.
//!
//! `typing.start` and `typing.stop` update the typing state and broadcast
//! the conversation's current typing list to every participant. Each
//! recipient gets a list with themselves filtered out, unless they are
//! the conversation's only participant.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::services::TypingService;
use crate::domain::{Conversation, ConversationRepository};
use crate::presentation::websocket::dispatcher::{ConnectionContext, HandlerError, MessageHandler};
use crate::presentation::websocket::frames::event_type;
use crate::presentation::websocket::hub::EventHub;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    conversation_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TypingIndicatorEvent {
    conversation_id: i64,
    typing_user_ids: Vec<i64>,
}

struct TypingCore {
    conversations: Arc<dyn ConversationRepository>,
    typing: Arc<TypingService>,
    hub: Arc<EventHub>,
}

impl TypingCore {
    async fn load_for(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<Conversation, HandlerError> {
        let conversation = self
            .conversations
            .find_with_participants(conversation_id)
            .await
            .map_err(|e| HandlerError::service(e.to_string()))?
            .ok_or_else(|| HandlerError::invalid_request("conversation not found"))?;
        if !conversation.is_participant(user_id) {
            return Err(HandlerError::unauthorized(
                "user is not a participant of this conversation",
            ));
        }
        Ok(conversation)
    }

    fn broadcast(&self, conversation: &Conversation) {
        let participant_count = conversation.participant_ids.len();
        for &viewer in &conversation.participant_ids {
            let typing_user_ids =
                self.typing
                    .visible_typing_users(conversation.id, viewer, participant_count);
            self.hub.send_to_user(
                viewer,
                event_type::TYPING_INDICATOR,
                &TypingIndicatorEvent {
                    conversation_id: conversation.id,
                    typing_user_ids,
                },
            );
        }
    }
}

pub struct TypingStartHandler {
    core: TypingCore,
}

impl TypingStartHandler {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        typing: Arc<TypingService>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            core: TypingCore {
                conversations,
                typing,
                hub,
            },
        }
    }
}

#[async_trait]
impl MessageHandler for TypingStartHandler {
    fn message_type(&self) -> &'static str {
        "typing.start"
    }

    async fn handle(&self, ctx: &ConnectionContext, payload: Value) -> Result<(), HandlerError> {
        let payload: TypingPayload = serde_json::from_value(payload)
            .map_err(|e| HandlerError::invalid_request(format!("malformed payload: {e}")))?;
        let conversation = self
            .core
            .load_for(payload.conversation_id, ctx.user_id)
            .await?;

        self.core.typing.set_typing(conversation.id, ctx.user_id);
        self.core.broadcast(&conversation);
        Ok(())
    }
}

pub struct TypingStopHandler {
    core: TypingCore,
}

impl TypingStopHandler {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        typing: Arc<TypingService>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            core: TypingCore {
                conversations,
                typing,
                hub,
            },
        }
    }
}

#[async_trait]
impl MessageHandler for TypingStopHandler {
    fn message_type(&self) -> &'static str {
        "typing.stop"
    }

    async fn handle(&self, ctx: &ConnectionContext, payload: Value) -> Result<(), HandlerError> {
        let payload: TypingPayload = serde_json::from_value(payload)
            .map_err(|e| HandlerError::invalid_request(format!("malformed payload: {e}")))?;
        let conversation = self
            .core
            .load_for(payload.conversation_id, ctx.user_id)
            .await?;

        self.core.typing.clear_typing(conversation.id, ctx.user_id);
        self.core.broadcast(&conversation);
        Ok(())
    }
}
