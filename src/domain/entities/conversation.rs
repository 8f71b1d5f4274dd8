//! Conversation entity and repository traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::message::Message;
use crate::shared::error::AppError;

/// A conversation with its participant set loaded.
///
/// The real-time layer only ever needs the participant IDs (for
/// authorization checks and fan-out targets) and the last-message pointer.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: i64,
    pub participant_ids: Vec<i64>,
    pub last_message_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether the given user participates in this conversation.
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.participant_ids.contains(&user_id)
    }
}

/// Conversation lookups used by the real-time handlers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Load a conversation together with its participant IDs.
    async fn find_with_participants(&self, id: i64) -> Result<Option<Conversation>, AppError>;

    /// Move the conversation's last-message pointer to the given message.
    async fn update_last_message(&self, id: i64, message: &Message) -> Result<(), AppError>;
}

/// Flush target for the unread-count synchronizer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// Overwrite the persisted unread count for one (conversation, user) pair.
    async fn set_unread_count(
        &self,
        conversation_id: i64,
        user_id: i64,
        count: i64,
    ) -> Result<(), AppError>;
}
