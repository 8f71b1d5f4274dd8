//! Chat message handler.
//!
//! Validates an inbound `chat.message` frame, assigns the message its
//! final ID, appends it to the write-behind buffer, and fans out the
//! resulting events. Delivery never waits on the database write.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Conversation, ConversationRepository, Message, MessageRepository};
use crate::infrastructure::cache::{MessageBuffer, UnreadCountCache};
use crate::presentation::middleware::rate_limit::RateLimiters;
use crate::presentation::websocket::dispatcher::{ConnectionContext, HandlerError, MessageHandler};
use crate::presentation::websocket::frames::event_type;
use crate::presentation::websocket::hub::EventHub;
use crate::shared::snowflake::SnowflakeGenerator;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessagePayload {
    conversation_id: i64,
    content: String,
    #[serde(default)]
    reply_to_id: Option<i64>,
    #[serde(default)]
    mentions: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessageEvent<'a> {
    message_id: i64,
    conversation_id: i64,
    sender_id: i64,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_id: Option<i64>,
    sent_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationUpdateEvent {
    conversation_id: i64,
    last_message_id: i64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MentionEvent<'a> {
    message_id: i64,
    conversation_id: i64,
    sender_id: i64,
    content: &'a str,
}

pub struct ChatMessageHandler {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    buffer: Arc<MessageBuffer>,
    unread: Arc<UnreadCountCache>,
    hub: Arc<EventHub>,
    snowflake: Arc<SnowflakeGenerator>,
    limiters: Arc<RateLimiters>,
}

impl ChatMessageHandler {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        buffer: Arc<MessageBuffer>,
        unread: Arc<UnreadCountCache>,
        hub: Arc<EventHub>,
        snowflake: Arc<SnowflakeGenerator>,
        limiters: Arc<RateLimiters>,
    ) -> Self {
        Self {
            conversations,
            messages,
            buffer,
            unread,
            hub,
            snowflake,
            limiters,
        }
    }

    async fn load_conversation(&self, id: i64) -> Result<Conversation, HandlerError> {
        self.conversations
            .find_with_participants(id)
            .await
            .map_err(|e| HandlerError::service(e.to_string()))?
            .ok_or_else(|| HandlerError::invalid_request("conversation not found"))
    }

    /// A reply target must exist (buffered or persisted) and belong to the
    /// same conversation as the reply.
    async fn validate_reply(
        &self,
        reply_to_id: i64,
        conversation_id: i64,
    ) -> Result<(), HandlerError> {
        let target = match self.buffer.find(reply_to_id) {
            Some(message) => Some(message),
            None => self
                .messages
                .find_by_id(reply_to_id)
                .await
                .map_err(|e| HandlerError::service(e.to_string()))?,
        };
        match target {
            Some(message) if message.conversation_id == conversation_id => Ok(()),
            Some(_) => Err(HandlerError::invalid_request(
                "reply target belongs to a different conversation",
            )),
            None => Err(HandlerError::invalid_request("reply target not found")),
        }
    }
}

#[async_trait]
impl MessageHandler for ChatMessageHandler {
    fn message_type(&self) -> &'static str {
        "chat.message"
    }

    async fn handle(&self, ctx: &ConnectionContext, payload: Value) -> Result<(), HandlerError> {
        let key = format!("user:{}", ctx.user_id);
        if self.limiters.chat.try_acquire(&key).is_err() {
            return Err(HandlerError::invalid_request(
                "message rate limit exceeded, slow down",
            ));
        }

        let payload: ChatMessagePayload = serde_json::from_value(payload)
            .map_err(|e| HandlerError::invalid_request(format!("malformed payload: {e}")))?;
        if payload.content.trim().is_empty() {
            return Err(HandlerError::invalid_request("message content is empty"));
        }

        let conversation = self.load_conversation(payload.conversation_id).await?;
        if !conversation.is_participant(ctx.user_id) {
            return Err(HandlerError::unauthorized(
                "sender is not a participant of this conversation",
            ));
        }

        if let Some(reply_to_id) = payload.reply_to_id {
            self.validate_reply(reply_to_id, conversation.id).await?;
        }

        for mention in &payload.mentions {
            if !conversation.is_participant(*mention) {
                return Err(HandlerError::invalid_request(format!(
                    "mentioned user {mention} is not a participant"
                )));
            }
        }

        let message = Message {
            id: self.snowflake.generate(),
            conversation_id: conversation.id,
            sender_id: ctx.user_id,
            content: payload.content,
            reply_to_id: payload.reply_to_id,
            mentions: payload.mentions,
            sent_at: Utc::now(),
        };

        let depth = self.buffer.append(message.clone());
        if self.buffer.over_threshold(depth) {
            self.buffer.flush().await;
        }

        // The last-message pointer is a direct write; a failure degrades
        // conversation ordering but never blocks delivery.
        if let Err(error) = self
            .conversations
            .update_last_message(conversation.id, &message)
            .await
        {
            tracing::warn!(
                conversation_id = conversation.id,
                message_id = message.id,
                error = %error,
                "Last-message update failed"
            );
        }

        for &participant in &conversation.participant_ids {
            if participant != ctx.user_id {
                self.unread.increment(conversation.id, participant);
            }
        }

        // Three independent fan-outs. Offline recipients are skipped, not
        // errors.
        self.hub.send_to_users(
            &conversation.participant_ids,
            event_type::CHAT_MESSAGE,
            &ChatMessageEvent {
                message_id: message.id,
                conversation_id: conversation.id,
                sender_id: message.sender_id,
                content: &message.content,
                reply_to_id: message.reply_to_id,
                sent_at: message.sent_at,
            },
        );

        for &mentioned in &message.mentions {
            if mentioned != ctx.user_id {
                self.hub.send_to_user(
                    mentioned,
                    event_type::MESSAGE_MENTION,
                    &MentionEvent {
                        message_id: message.id,
                        conversation_id: conversation.id,
                        sender_id: message.sender_id,
                        content: &message.content,
                    },
                );
            }
        }

        self.hub.send_to_users(
            &conversation.participant_ids,
            event_type::CONVERSATION_UPDATE,
            &ConversationUpdateEvent {
                conversation_id: conversation.id,
                last_message_id: message.id,
                updated_at: message.sent_at,
            },
        );

        Ok(())
    }
}
