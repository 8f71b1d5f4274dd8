//! WebSocket connection lifecycle.
//!
//! Upgrade with `?token=` authentication, a writer task fed by an
//! unbounded channel, a read loop that parses and dispatches frames, a
//! liveness tick, and cleanup that untangles registry, typing state, and
//! any active call when the socket goes away.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::dispatcher::ConnectionContext;
use super::frames::Frame;
use crate::presentation::middleware::auth::verify_token;
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// WebSocket upgrade endpoint. The token travels as a query parameter
/// because browser WebSocket clients cannot set an Authorization header.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let user_id = match verify_token(&query.token, &state.settings.jwt.secret) {
        Ok(user_id) => user_id,
        Err(error) => return error.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, user_id: i64, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let connection_id = state.registry.register(user_id, tx.clone());
    tracing::info!(user_id, connection = %connection_id, "WebSocket connected");

    // Writer task: everything outbound funnels through the channel so
    // handlers and background services never touch the socket directly.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender
                .send(Message::Text(frame.to_json().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let ctx = ConnectionContext::new(user_id, connection_id, tx);
    let liveness_timeout = state.settings.websocket.liveness_timeout_secs as i64;
    let mut liveness = tokio::time::interval(std::time::Duration::from_secs(
        state.settings.websocket.liveness_sweep_secs.max(1),
    ));
    liveness.reset();

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.registry.touch(user_id);
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => state.dispatcher.dispatch(&ctx, frame).await,
                            Err(error) => {
                                tracing::debug!(user_id, error = %error, "Unparseable frame");
                                ctx.reply(Frame::new(
                                    "error",
                                    serde_json::json!({
                                        "errorType": "invalid_request",
                                        "message": "frame is not valid JSON",
                                    }),
                                ));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        state.registry.touch(user_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames are ignored
                    Some(Err(error)) => {
                        tracing::debug!(user_id, error = %error, "WebSocket read error");
                        break;
                    }
                }
            }
            _ = liveness.tick() => {
                if state.registry.is_stale(user_id, connection_id, liveness_timeout) {
                    tracing::info!(user_id, connection = %connection_id, "Closing stale connection");
                    break;
                }
            }
            _ = &mut writer => break,
        }
    }

    cleanup(&state, user_id, connection_id).await;
    writer.abort();
    tracing::info!(user_id, connection = %connection_id, "WebSocket disconnected");
}

/// Disconnect cleanup. Ordering matters: the registry entry goes first so
/// subsequent sends see the user offline, then typing state, then any
/// active call is ended on the peer's behalf.
async fn cleanup(state: &AppState, user_id: i64, connection_id: uuid::Uuid) {
    let superseded = !state.registry.owns(user_id, connection_id);
    state.registry.unregister_connection(user_id, connection_id);

    // A superseded connection leaves typing state and calls to its
    // replacement.
    if superseded {
        return;
    }

    state.typing.remove_user_everywhere(user_id);
    state.calls.handle_disconnect(user_id).await;
}
