//! Conversation Repository Implementation
//!
//! PostgreSQL lookups for conversations and their participant sets, plus
//! the unread-count flush target.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{
    Conversation, ConversationRepository, Message, ParticipantRepository,
};
use crate::shared::error::AppError;

pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    /// Creates a new PgConversationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for conversation queries.
#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    last_message_id: Option<i64>,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    /// Load a conversation together with its participant IDs.
    async fn find_with_participants(&self, id: i64) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, last_message_id, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let participant_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM conversation_participants
            WHERE conversation_id = $1
            ORDER BY user_id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Conversation {
            id: row.id,
            participant_ids,
            last_message_id: row.last_message_id,
            updated_at: row.updated_at,
        }))
    }

    /// Move the conversation's last-message pointer.
    async fn update_last_message(&self, id: i64, message: &Message) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_id = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(message.id)
        .bind(message.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct PgParticipantRepository {
    pool: PgPool,
}

impl PgParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantRepository for PgParticipantRepository {
    /// Overwrite the persisted unread count for one membership row.
    async fn set_unread_count(
        &self,
        conversation_id: i64,
        user_id: i64,
        count: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE conversation_participants
            SET unread_count = $3
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
