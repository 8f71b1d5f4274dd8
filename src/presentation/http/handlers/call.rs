//! Call Handlers
//!
//! HTTP entry point for starting a call. Accept, reject, and end travel
//! over the WebSocket; initiation is also offered over HTTP so clients
//! can start a call before their socket is up.

use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::services::call_service::CallError;
use crate::presentation::middleware::auth::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallRequest {
    pub callee_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    pub call_id: String,
    pub caller_id: i64,
    pub callee_id: i64,
    pub status: String,
    pub started_at: DateTime<Utc>,
}

impl From<CallError> for AppError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::InvalidRequest(message) => AppError::BadRequest(message),
            CallError::NotFound => AppError::NotFound("call not found".into()),
            CallError::Unauthorized(message) => AppError::Forbidden(message),
            CallError::InvalidStatus(message) => AppError::Conflict(message),
            CallError::Storage(inner) => inner,
        }
    }
}

/// `POST /api/calls` - initiate a call to another user.
pub async fn initiate_call(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<InitiateCallRequest>,
) -> Result<(StatusCode, Json<CallResponse>), AppError> {
    let call = state
        .calls
        .initiate(auth_user.user_id, request.callee_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CallResponse {
            call_id: call.id,
            caller_id: call.caller_id,
            callee_id: call.callee_id,
            status: call.status.to_string(),
            started_at: call.started_at,
        }),
    ))
}
