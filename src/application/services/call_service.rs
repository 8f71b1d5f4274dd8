//! Call Signaling Service
//!
//! One-to-one call lifecycle: initiate, accept, reject, end, and the
//! periodic ring-timeout sweep. There is no per-call timer task; a single
//! sweep finds overdue ringing calls each tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Call, CallRepository, CallStatus};
use crate::presentation::websocket::frames::event_type;
use crate::presentation::websocket::hub::EventHub;
use crate::shared::error::AppError;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("call not found")]
    NotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    InvalidStatus(String),

    #[error(transparent)]
    Storage(#[from] AppError),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IncomingPayload<'a> {
    call_id: &'a str,
    caller_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedPayload<'a> {
    call_id: &'a str,
    callee_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectedPayload<'a> {
    call_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EndedPayload<'a> {
    call_id: &'a str,
    duration_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeoutPayload<'a> {
    call_id: &'a str,
}

pub struct CallService {
    calls: Arc<dyn CallRepository>,
    hub: Arc<EventHub>,
    ring_timeout: Duration,
}

impl CallService {
    pub fn new(calls: Arc<dyn CallRepository>, hub: Arc<EventHub>, ring_timeout: Duration) -> Self {
        Self {
            calls,
            hub,
            ring_timeout,
        }
    }

    /// Start a call from `caller_id` to `callee_id`.
    ///
    /// Either party already having a non-terminal call makes the request
    /// an invalid-status failure (busy). The callee is notified with
    /// `call.incoming`; an offline callee is not an error, the ring will
    /// simply time out.
    pub async fn initiate(&self, caller_id: i64, callee_id: i64) -> Result<Call, CallError> {
        if caller_id == callee_id {
            return Err(CallError::InvalidRequest("cannot call yourself".into()));
        }
        if self.calls.find_active_by_user(caller_id).await?.is_some() {
            return Err(CallError::InvalidStatus("caller is busy".into()));
        }
        if self.calls.find_active_by_user(callee_id).await?.is_some() {
            return Err(CallError::InvalidStatus("callee is busy".into()));
        }

        let call = Call {
            id: Uuid::new_v4().to_string(),
            caller_id,
            callee_id,
            status: CallStatus::Ringing,
            started_at: Utc::now(),
            accepted_at: None,
            ended_at: None,
            duration_seconds: None,
        };
        self.calls.insert(&call).await?;

        tracing::info!(call_id = %call.id, caller_id, callee_id, "Call initiated");
        self.hub.send_to_user(
            callee_id,
            event_type::CALL_INCOMING,
            &IncomingPayload {
                call_id: &call.id,
                caller_id,
            },
        );
        Ok(call)
    }

    /// Accept a ringing call. Only the callee may accept.
    pub async fn accept(&self, call_id: &str, user_id: i64) -> Result<Call, CallError> {
        let mut call = self.load_for(call_id, user_id).await?;

        if user_id != call.callee_id {
            return Err(CallError::Unauthorized(
                "only the callee can accept a call".into(),
            ));
        }
        if !matches!(call.status, CallStatus::Initiated | CallStatus::Ringing) {
            return Err(CallError::InvalidStatus(format!(
                "cannot accept a call in status '{}'",
                call.status
            )));
        }

        call.status = CallStatus::Accepted;
        call.accepted_at = Some(Utc::now());
        self.calls.update(&call).await?;

        tracing::info!(call_id = %call.id, user_id, "Call accepted");
        self.hub.send_to_user(
            call.caller_id,
            event_type::CALL_ACCEPTED,
            &AcceptedPayload {
                call_id: &call.id,
                callee_id: call.callee_id,
            },
        );
        Ok(call)
    }

    /// Reject a ringing call. Only the callee may reject.
    pub async fn reject(
        &self,
        call_id: &str,
        user_id: i64,
        reason: Option<&str>,
    ) -> Result<Call, CallError> {
        let mut call = self.load_for(call_id, user_id).await?;

        if user_id != call.callee_id {
            return Err(CallError::Unauthorized(
                "only the callee can reject a call".into(),
            ));
        }
        if !matches!(call.status, CallStatus::Initiated | CallStatus::Ringing) {
            return Err(CallError::InvalidStatus(format!(
                "cannot reject a call in status '{}'",
                call.status
            )));
        }

        call.status = CallStatus::Rejected;
        call.ended_at = Some(Utc::now());
        self.calls.update(&call).await?;

        tracing::info!(call_id = %call.id, user_id, "Call rejected");
        self.hub.send_to_user(
            call.caller_id,
            event_type::CALL_REJECTED,
            &RejectedPayload {
                call_id: &call.id,
                reason,
            },
        );
        Ok(call)
    }

    /// End a call. Either party may end; ending an already-terminal call
    /// is an idempotent no-op that returns the stored record unchanged.
    ///
    /// The duration is the client-reported value when one is supplied,
    /// otherwise computed from the accept timestamp. A call ended before
    /// acceptance has a duration of zero.
    pub async fn end(
        &self,
        call_id: &str,
        user_id: i64,
        duration_override: Option<i64>,
    ) -> Result<Call, CallError> {
        let mut call = self.load_for(call_id, user_id).await?;

        if call.status.is_terminal() {
            return Ok(call);
        }

        let now = Utc::now();
        let duration = duration_override.unwrap_or_else(|| {
            call.accepted_at
                .map(|accepted| (now - accepted).num_seconds().max(0))
                .unwrap_or(0)
        });

        call.status = CallStatus::Ended;
        call.ended_at = Some(now);
        call.duration_seconds = Some(duration);
        self.calls.update(&call).await?;

        tracing::info!(call_id = %call.id, user_id, duration, "Call ended");
        self.hub.send_to_user(
            call.peer_of(user_id),
            event_type::CALL_ENDED,
            &EndedPayload {
                call_id: &call.id,
                duration_seconds: duration,
            },
        );
        Ok(call)
    }

    /// Time out every call that has been ringing longer than the ring
    /// timeout. Both parties are notified. Returns the number of calls
    /// timed out this pass.
    pub async fn sweep_timeouts(&self) -> Result<usize, CallError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ring_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let overdue = self.calls.find_ringing_before(cutoff).await?;
        let count = overdue.len();

        for mut call in overdue {
            call.status = CallStatus::Timeout;
            call.ended_at = Some(Utc::now());
            if let Err(error) = self.calls.update(&call).await {
                tracing::warn!(call_id = %call.id, error = %error, "Call timeout update failed");
                continue;
            }
            tracing::info!(call_id = %call.id, "Call timed out");
            let payload = TimeoutPayload { call_id: &call.id };
            self.hub
                .send_to_user(call.caller_id, event_type::CALL_TIMEOUT, &payload);
            self.hub
                .send_to_user(call.callee_id, event_type::CALL_TIMEOUT, &payload);
        }
        Ok(count)
    }

    /// End the user's active call when their connection drops, so the
    /// peer is not left in a call with a ghost.
    pub async fn handle_disconnect(&self, user_id: i64) {
        match self.calls.find_active_by_user(user_id).await {
            Ok(Some(call)) => {
                let call_id = call.id.clone();
                if let Err(error) = self.end(&call_id, user_id, None).await {
                    tracing::warn!(
                        call_id = %call_id,
                        user_id,
                        error = %error,
                        "Failed to end call on disconnect"
                    );
                }
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(user_id, error = %error, "Active call lookup failed on disconnect");
            }
        }
    }

    async fn load_for(&self, call_id: &str, user_id: i64) -> Result<Call, CallError> {
        let call = self
            .calls
            .find_by_id(call_id)
            .await?
            .ok_or(CallError::NotFound)?;
        if !call.is_participant(user_id) {
            return Err(CallError::Unauthorized(
                "user is not a participant of this call".into(),
            ));
        }
        Ok(call)
    }
}

/// Periodic timeout sweep loop, spawned at startup.
pub async fn run_timeout_sweep(service: Arc<CallService>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(error) = service.sweep_timeouts().await {
            tracing::warn!(error = %error, "Call timeout sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockCallRepository;
    use crate::presentation::websocket::frames::Frame;
    use crate::presentation::websocket::registry::ConnectionRegistry;
    use tokio::sync::mpsc;

    fn ringing_call(id: &str, caller: i64, callee: i64) -> Call {
        Call {
            id: id.into(),
            caller_id: caller,
            callee_id: callee,
            status: CallStatus::Ringing,
            started_at: Utc::now(),
            accepted_at: None,
            ended_at: None,
            duration_seconds: None,
        }
    }

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        hub: Arc<EventHub>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let hub = Arc::new(EventHub::new(registry.clone()));
            Self { registry, hub }
        }

        fn connect(&self, user_id: i64) -> mpsc::UnboundedReceiver<Frame> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.registry.register(user_id, tx);
            rx
        }

        fn service(&self, calls: MockCallRepository) -> CallService {
            CallService::new(Arc::new(calls), self.hub.clone(), Duration::from_secs(60))
        }
    }

    #[tokio::test]
    async fn test_initiate_notifies_callee() {
        let fixture = Fixture::new();
        let mut callee_rx = fixture.connect(2);

        let mut calls = MockCallRepository::new();
        calls
            .expect_find_active_by_user()
            .returning(|_| Ok(None));
        calls.expect_insert().returning(|_| Ok(()));

        let service = fixture.service(calls);
        let call = service.initiate(1, 2).await.unwrap();

        assert_eq!(call.status, CallStatus::Ringing);
        let frame = callee_rx.try_recv().unwrap();
        assert_eq!(frame.frame_type, "call.incoming");
        assert_eq!(frame.payload["callerId"], 1);
    }

    #[tokio::test]
    async fn test_initiate_to_self_is_invalid_request() {
        let fixture = Fixture::new();
        let service = fixture.service(MockCallRepository::new());
        let result = service.initiate(1, 1).await;
        assert!(matches!(result, Err(CallError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_initiate_rejects_busy_caller() {
        let fixture = Fixture::new();
        let mut calls = MockCallRepository::new();
        calls
            .expect_find_active_by_user()
            .returning(|user_id| Ok((user_id == 1).then(|| ringing_call("c0", 1, 9))));

        let service = fixture.service(calls);
        let result = service.initiate(1, 2).await;
        assert!(matches!(result, Err(CallError::InvalidStatus(_))));
    }

    #[tokio::test]
    async fn test_caller_cannot_accept_own_call() {
        let fixture = Fixture::new();
        let mut calls = MockCallRepository::new();
        calls
            .expect_find_by_id()
            .returning(|_| Ok(Some(ringing_call("c1", 1, 2))));

        let service = fixture.service(calls);
        let result = service.accept("c1", 1).await;
        assert!(matches!(result, Err(CallError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_accept_notifies_caller() {
        let fixture = Fixture::new();
        let mut caller_rx = fixture.connect(1);

        let mut calls = MockCallRepository::new();
        calls
            .expect_find_by_id()
            .returning(|_| Ok(Some(ringing_call("c1", 1, 2))));
        calls.expect_update().returning(|_| Ok(()));

        let service = fixture.service(calls);
        let call = service.accept("c1", 2).await.unwrap();

        assert_eq!(call.status, CallStatus::Accepted);
        assert!(call.accepted_at.is_some());
        let frame = caller_rx.try_recv().unwrap();
        assert_eq!(frame.frame_type, "call.accepted");
    }

    #[tokio::test]
    async fn test_accept_terminal_call_is_invalid_status() {
        let fixture = Fixture::new();
        let mut calls = MockCallRepository::new();
        calls.expect_find_by_id().returning(|_| {
            let mut call = ringing_call("c1", 1, 2);
            call.status = CallStatus::Rejected;
            Ok(Some(call))
        });

        let service = fixture.service(calls);
        let result = service.accept("c1", 2).await;
        assert!(matches!(result, Err(CallError::InvalidStatus(_))));
    }

    #[tokio::test]
    async fn test_non_participant_is_unauthorized() {
        let fixture = Fixture::new();
        let mut calls = MockCallRepository::new();
        calls
            .expect_find_by_id()
            .returning(|_| Ok(Some(ringing_call("c1", 1, 2))));

        let service = fixture.service(calls);
        let result = service.end("c1", 99, None).await;
        assert!(matches!(result, Err(CallError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_unknown_call_is_not_found() {
        let fixture = Fixture::new();
        let mut calls = MockCallRepository::new();
        calls.expect_find_by_id().returning(|_| Ok(None));

        let service = fixture.service(calls);
        let result = service.accept("missing", 2).await;
        assert!(matches!(result, Err(CallError::NotFound)));
    }

    #[tokio::test]
    async fn test_end_is_idempotent_on_terminal_call() {
        let fixture = Fixture::new();
        let mut peer_rx = fixture.connect(2);

        let mut calls = MockCallRepository::new();
        calls.expect_find_by_id().returning(|_| {
            let mut call = ringing_call("c1", 1, 2);
            call.status = CallStatus::Ended;
            call.duration_seconds = Some(30);
            Ok(Some(call))
        });
        calls.expect_update().never();

        let service = fixture.service(calls);
        let call = service.end("c1", 1, None).await.unwrap();

        assert_eq!(call.status, CallStatus::Ended);
        assert_eq!(call.duration_seconds, Some(30));
        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_end_computes_duration_and_notifies_peer() {
        let fixture = Fixture::new();
        let mut callee_rx = fixture.connect(2);

        let mut calls = MockCallRepository::new();
        calls.expect_find_by_id().returning(|_| {
            let mut call = ringing_call("c1", 1, 2);
            call.status = CallStatus::Accepted;
            call.accepted_at = Some(Utc::now() - chrono::Duration::seconds(42));
            Ok(Some(call))
        });
        calls.expect_update().returning(|_| Ok(()));

        let service = fixture.service(calls);
        let call = service.end("c1", 1, None).await.unwrap();

        assert_eq!(call.status, CallStatus::Ended);
        assert!(call.duration_seconds.unwrap() >= 42);
        let frame = callee_rx.try_recv().unwrap();
        assert_eq!(frame.frame_type, "call.ended");
    }

    #[tokio::test]
    async fn test_end_before_accept_has_zero_duration() {
        let fixture = Fixture::new();
        let mut calls = MockCallRepository::new();
        calls
            .expect_find_by_id()
            .returning(|_| Ok(Some(ringing_call("c1", 1, 2))));
        calls.expect_update().returning(|_| Ok(()));

        let service = fixture.service(calls);
        let call = service.end("c1", 1, None).await.unwrap();
        assert_eq!(call.duration_seconds, Some(0));
    }

    #[tokio::test]
    async fn test_sweep_times_out_overdue_calls() {
        let fixture = Fixture::new();
        let mut caller_rx = fixture.connect(1);
        let mut callee_rx = fixture.connect(2);

        let mut calls = MockCallRepository::new();
        calls
            .expect_find_ringing_before()
            .returning(|_| Ok(vec![ringing_call("c1", 1, 2)]));
        calls.expect_update().returning(|call| {
            assert_eq!(call.status, CallStatus::Timeout);
            Ok(())
        });

        let service = fixture.service(calls);
        assert_eq!(service.sweep_timeouts().await.unwrap(), 1);
        assert_eq!(caller_rx.try_recv().unwrap().frame_type, "call.timeout");
        assert_eq!(callee_rx.try_recv().unwrap().frame_type, "call.timeout");
    }

    #[tokio::test]
    async fn test_disconnect_ends_active_call() {
        let fixture = Fixture::new();
        let mut peer_rx = fixture.connect(2);

        let mut calls = MockCallRepository::new();
        let active = {
            let mut call = ringing_call("c1", 1, 2);
            call.status = CallStatus::Accepted;
            call.accepted_at = Some(Utc::now());
            call
        };
        let lookup = active.clone();
        calls
            .expect_find_active_by_user()
            .returning(move |_| Ok(Some(lookup.clone())));
        calls
            .expect_find_by_id()
            .returning(move |_| Ok(Some(active.clone())));
        calls.expect_update().returning(|_| Ok(()));

        let service = fixture.service(calls);
        service.handle_disconnect(1).await;
        assert_eq!(peer_rx.try_recv().unwrap().frame_type, "call.ended");
    }
}
