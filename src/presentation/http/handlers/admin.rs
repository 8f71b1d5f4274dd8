//! Admin Handlers
//!
//! Operational surface over the in-process structures: buffer inspection
//! and control, unread-count sync, and event hub counters.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::infrastructure::cache::message_buffer::BufferStats;
use crate::infrastructure::cache::FlushReport;
use crate::presentation::websocket::hub::HubStats;
use crate::shared::error::AppError;
use crate::startup::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedResponse {
    pub discarded: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub synced: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub reset: bool,
}

/// `GET /api/admin/buffers` - current buffer counters.
pub async fn buffer_stats(State(state): State<AppState>) -> Json<BufferStats> {
    Json(state.message_buffer.stats())
}

/// `POST /api/admin/buffers/flush` - force a flush pass now.
pub async fn flush_buffers(State(state): State<AppState>) -> Json<FlushReport> {
    Json(state.message_buffer.flush().await)
}

/// `DELETE /api/admin/buffers` - discard buffered messages without
/// persisting them. Destructive; exists for draining a poisoned buffer.
pub async fn clear_buffers(State(state): State<AppState>) -> Json<ClearedResponse> {
    Json(ClearedResponse {
        discarded: state.message_buffer.clear(),
    })
}

/// `POST /api/admin/unread/sync` - push the unread snapshot to storage now.
pub async fn sync_unread(
    State(state): State<AppState>,
) -> Result<Json<SyncResponse>, AppError> {
    let synced = state
        .unread
        .sync_to_database(state.participants.as_ref())
        .await;
    Ok(Json(SyncResponse { synced }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub online_user_ids: Vec<i64>,
    pub count: usize,
}

/// `GET /api/admin/presence` - currently connected users.
pub async fn presence(State(state): State<AppState>) -> Json<PresenceResponse> {
    let mut online_user_ids = state.presence.online_user_ids();
    online_user_ids.sort_unstable();
    Json(PresenceResponse {
        count: online_user_ids.len(),
        online_user_ids,
    })
}

/// `GET /api/admin/events` - event hub delivery counters.
pub async fn event_stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}

/// `DELETE /api/admin/events` - reset the event hub counters.
pub async fn reset_event_stats(State(state): State<AppState>) -> Json<ResetResponse> {
    state.hub.reset_stats();
    Json(ResetResponse { reset: true })
}
