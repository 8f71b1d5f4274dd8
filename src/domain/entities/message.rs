//! Message entity and repository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A chat message.
///
/// IDs are snowflakes assigned before the message ever reaches storage, so
/// a buffered-but-unflushed message is already fully addressable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub reply_to_id: Option<i64>,
    pub mentions: Vec<i64>,
    pub sent_at: DateTime<Utc>,
}

/// Message persistence used by the write-behind buffer and reply validation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist one message. The ID is already assigned by the caller.
    async fn insert(&self, message: &Message) -> Result<(), AppError>;

    /// Look up a message by ID (reply-target validation).
    async fn find_by_id(&self, id: i64) -> Result<Option<Message>, AppError>;
}
