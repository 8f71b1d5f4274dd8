//! Call Repository Implementation
//!
//! PostgreSQL persistence for call signaling records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Call, CallRepository, CallStatus};
use crate::shared::error::AppError;

pub struct PgCallRepository {
    pool: PgPool,
}

impl PgCallRepository {
    /// Creates a new PgCallRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for call queries.
#[derive(Debug, sqlx::FromRow)]
struct CallRow {
    id: String,
    caller_id: i64,
    callee_id: i64,
    status: String,
    started_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
}

impl CallRow {
    fn into_call(self) -> Result<Call, AppError> {
        let status = CallStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("unknown call status '{}'", self.status)))?;
        Ok(Call {
            id: self.id,
            caller_id: self.caller_id,
            callee_id: self.callee_id,
            status,
            started_at: self.started_at,
            accepted_at: self.accepted_at,
            ended_at: self.ended_at,
            duration_seconds: self.duration_seconds,
        })
    }
}

const SELECT_CALL: &str = r#"
    SELECT id, caller_id, callee_id, status, started_at,
           accepted_at, ended_at, duration_seconds
    FROM calls
"#;

#[async_trait]
impl CallRepository for PgCallRepository {
    async fn insert(&self, call: &Call) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO calls (id, caller_id, callee_id, status, started_at,
                               accepted_at, ended_at, duration_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&call.id)
        .bind(call.caller_id)
        .bind(call.callee_id)
        .bind(call.status.as_str())
        .bind(call.started_at)
        .bind(call.accepted_at)
        .bind(call.ended_at)
        .bind(call.duration_seconds)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Call>, AppError> {
        let row = sqlx::query_as::<_, CallRow>(&format!("{SELECT_CALL} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CallRow::into_call).transpose()
    }

    async fn update(&self, call: &Call) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE calls
            SET status = $2, accepted_at = $3, ended_at = $4, duration_seconds = $5
            WHERE id = $1
            "#,
        )
        .bind(&call.id)
        .bind(call.status.as_str())
        .bind(call.accepted_at)
        .bind(call.ended_at)
        .bind(call.duration_seconds)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The non-terminal call a user participates in, if any.
    async fn find_active_by_user(&self, user_id: i64) -> Result<Option<Call>, AppError> {
        let row = sqlx::query_as::<_, CallRow>(&format!(
            r#"{SELECT_CALL}
            WHERE (caller_id = $1 OR callee_id = $1)
              AND status IN ('initiated', 'ringing', 'accepted')
            ORDER BY started_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CallRow::into_call).transpose()
    }

    /// Calls still ringing whose ring started before `cutoff`.
    async fn find_ringing_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Call>, AppError> {
        let rows = sqlx::query_as::<_, CallRow>(&format!(
            r#"{SELECT_CALL}
            WHERE status IN ('initiated', 'ringing')
              AND started_at < $1
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CallRow::into_call).collect()
    }
}
