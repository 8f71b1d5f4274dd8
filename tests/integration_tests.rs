//! End-to-end flows through the frame dispatcher: chat fan-out, the call
//! lifecycle, ring timeouts, and rate-limit windows.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use chat_relay::domain::CallStatus;
use common::{InMemoryConversationRepository, TestHarness};

#[tokio::test]
async fn chat_message_reaches_both_participants() {
    let harness = TestHarness::new(
        InMemoryConversationRepository::default().with_conversation(10, vec![1, 2]),
    );
    let mut alice = harness.connect(1);
    let mut bob = harness.connect(2);

    harness
        .send(
            &alice,
            "chat.message",
            json!({"conversationId": 10, "content": "hello"}),
        )
        .await;

    let alice_frames = alice.drain();
    let bob_frames = bob.drain();

    let alice_msg = alice_frames
        .iter()
        .find(|f| f.frame_type == "chat.message")
        .expect("sender receives own message");
    let bob_msg = bob_frames
        .iter()
        .find(|f| f.frame_type == "chat.message")
        .expect("peer receives message");

    assert_eq!(alice_msg.payload["messageId"], bob_msg.payload["messageId"]);
    assert_eq!(bob_msg.payload["content"], "hello");
    assert_eq!(bob_msg.payload["senderId"], 1);
    assert!(bob_frames
        .iter()
        .any(|f| f.frame_type == "conversation.update"));

    // Delivery happened before any database write.
    assert_eq!(harness.buffer.depth(), 1);
    assert_eq!(harness.messages.stored_count(), 0);
    assert_eq!(harness.unread.get(10, 2), 1);
    assert_eq!(harness.unread.get(10, 1), 0);

    let report = harness.buffer.flush().await;
    assert_eq!(report.flushed, 1);
    assert_eq!(harness.messages.stored_count(), 1);
    assert_eq!(
        harness.conversations.last_message_id(10),
        bob_msg.payload["messageId"].as_i64()
    );
}

#[tokio::test]
async fn chat_from_non_participant_errors_only_to_sender() {
    let harness = TestHarness::new(
        InMemoryConversationRepository::default().with_conversation(10, vec![2, 3]),
    );
    let mut outsider = harness.connect(1);
    let mut bob = harness.connect(2);

    harness
        .send(
            &outsider,
            "chat.message",
            json!({"conversationId": 10, "content": "let me in"}),
        )
        .await;

    let error = outsider.next_of_type("error").expect("sender gets error");
    assert_eq!(error.payload["errorType"], "unauthorized");
    assert!(bob.drain().is_empty());
    assert_eq!(harness.buffer.depth(), 0);
}

#[tokio::test]
async fn malformed_payload_is_rejected_with_invalid_request() {
    let harness = TestHarness::new(InMemoryConversationRepository::default());
    let mut alice = harness.connect(1);

    harness
        .send(&alice, "chat.message", json!({"conversationId": "nope"}))
        .await;

    let error = alice.next_of_type("error").expect("sender gets error");
    assert_eq!(error.payload["errorType"], "invalid_request");
}

#[tokio::test]
async fn call_accept_and_end_complete_the_lifecycle() {
    let harness = TestHarness::new(InMemoryConversationRepository::default());
    let mut alice = harness.connect(1);
    let mut bob = harness.connect(2);

    harness
        .send(&alice, "call.initiate", json!({"calleeId": 2}))
        .await;

    let ringing = alice.next_of_type("call.ringing").expect("caller ring view");
    let incoming = bob.next_of_type("call.incoming").expect("callee is rung");
    let call_id = ringing.payload["callId"].as_str().unwrap().to_string();
    assert_eq!(incoming.payload["callId"].as_str().unwrap(), call_id);
    assert_eq!(incoming.payload["callerId"], 1);

    harness
        .send(&bob, "call.accept", json!({"callId": call_id}))
        .await;

    let accepted = alice
        .next_of_type("call.accepted")
        .expect("caller told of accept");
    assert_eq!(accepted.payload["calleeId"], 2);
    assert_eq!(
        harness.call_repo.get(&call_id).unwrap().status,
        CallStatus::Accepted
    );

    harness
        .send(&bob, "call.end", json!({"callId": call_id}))
        .await;

    let ended = alice.next_of_type("call.ended").expect("peer told of end");
    assert!(ended.payload["durationSeconds"].as_i64().unwrap() >= 0);
    let stored = harness.call_repo.get(&call_id).unwrap();
    assert_eq!(stored.status, CallStatus::Ended);
    assert!(stored.status.is_terminal());

    // Ending an already-ended call is a no-op, not an error.
    harness
        .send(&alice, "call.end", json!({"callId": call_id}))
        .await;
    assert!(alice.drain().iter().all(|f| f.frame_type != "call_error"));
    assert!(bob.drain().iter().all(|f| f.frame_type != "call.ended"));
}

#[tokio::test]
async fn busy_callee_rejects_second_initiate() {
    let harness = TestHarness::new(InMemoryConversationRepository::default());
    let mut alice = harness.connect(1);
    let mut carol = harness.connect(3);
    harness.connect(2);

    harness
        .send(&alice, "call.initiate", json!({"calleeId": 2}))
        .await;
    assert!(alice.next_of_type("call.ringing").is_some());

    harness
        .send(&carol, "call.initiate", json!({"calleeId": 2}))
        .await;

    // No call was created, so the failure has no call id to tag.
    let error = carol.next_of_type("error").expect("busy signal");
    assert_eq!(error.payload["errorType"], "invalid_status");
}

#[tokio::test]
async fn unanswered_call_times_out_for_both_parties() {
    let harness = TestHarness::with_ring_timeout(
        InMemoryConversationRepository::default(),
        Duration::ZERO,
    );
    let mut alice = harness.connect(1);
    let mut bob = harness.connect(2);

    harness
        .send(&alice, "call.initiate", json!({"calleeId": 2}))
        .await;
    let ringing = alice.next_of_type("call.ringing").unwrap();
    let call_id = ringing.payload["callId"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let timed_out = harness.calls.sweep_timeouts().await.unwrap();
    assert_eq!(timed_out, 1);

    let caller_view = alice.next_of_type("call.timeout").expect("caller notified");
    let callee_view = bob.next_of_type("call.timeout").expect("callee notified");
    assert_eq!(caller_view.payload["callId"].as_str().unwrap(), call_id);
    assert_eq!(callee_view.payload["callId"].as_str().unwrap(), call_id);
    assert_eq!(
        harness.call_repo.get(&call_id).unwrap().status,
        CallStatus::Timeout
    );

    // A late accept hits the terminal state.
    harness
        .send(&bob, "call.accept", json!({"callId": call_id}))
        .await;
    let error = bob.next_of_type("call_error").expect("late accept fails");
    assert_eq!(error.payload["errorType"], "invalid_status");
    assert_eq!(error.payload["callId"].as_str().unwrap(), call_id);
}

#[tokio::test]
async fn disconnect_ends_the_active_call_for_the_peer() {
    let harness = TestHarness::new(InMemoryConversationRepository::default());
    let mut alice = harness.connect(1);
    let mut bob = harness.connect(2);

    harness
        .send(&alice, "call.initiate", json!({"calleeId": 2}))
        .await;
    let call_id = alice.next_of_type("call.ringing").unwrap().payload["callId"]
        .as_str()
        .unwrap()
        .to_string();
    harness
        .send(&bob, "call.accept", json!({"callId": call_id}))
        .await;
    alice.drain();

    harness.calls.handle_disconnect(2).await;

    assert!(alice.next_of_type("call.ended").is_some());
    assert!(harness
        .call_repo
        .get(&call_id)
        .unwrap()
        .status
        .is_terminal());
}

#[tokio::test]
async fn typing_indicator_excludes_the_viewer() {
    let harness = TestHarness::new(
        InMemoryConversationRepository::default().with_conversation(10, vec![1, 2]),
    );
    let mut alice = harness.connect(1);
    let mut bob = harness.connect(2);

    harness
        .send(&alice, "typing.start", json!({"conversationId": 10}))
        .await;

    let bob_view = bob.next_of_type("typing.indicator").expect("peer notified");
    assert_eq!(bob_view.payload["typingUserIds"], json!([1]));
    let alice_view = alice
        .next_of_type("typing.indicator")
        .expect("sender gets own view");
    assert_eq!(alice_view.payload["typingUserIds"], json!([]));

    harness
        .send(&alice, "typing.stop", json!({"conversationId": 10}))
        .await;
    let bob_view = bob.next_of_type("typing.indicator").unwrap();
    assert_eq!(bob_view.payload["typingUserIds"], json!([]));
}

#[tokio::test]
async fn heartbeat_is_acknowledged() {
    let harness = TestHarness::new(InMemoryConversationRepository::default());
    let mut alice = harness.connect(1);

    harness.send(&alice, "heartbeat", json!({})).await;

    let ack = alice.next_of_type("heartbeat.ack").expect("ack sent back");
    assert_eq!(ack.payload["userId"], 1);
}

#[tokio::test]
async fn reconnect_routes_frames_to_the_replacement_connection() {
    let harness = TestHarness::new(
        InMemoryConversationRepository::default().with_conversation(10, vec![1, 2]),
    );
    let alice = harness.connect(1);
    let mut stale_bob = harness.connect(2);
    let mut fresh_bob = harness.connect(2);
    assert_eq!(harness.registry.connection_count(), 2);

    harness
        .send(
            &alice,
            "chat.message",
            json!({"conversationId": 10, "content": "are you there"}),
        )
        .await;

    assert!(fresh_bob.next_of_type("chat.message").is_some());
    assert!(stale_bob.next_of_type("chat.message").is_none());
}

#[tokio::test]
async fn unread_counts_survive_until_synced() {
    let harness = TestHarness::new(
        InMemoryConversationRepository::default().with_conversation(10, vec![1, 2, 3]),
    );
    let alice = harness.connect(1);

    for _ in 0..3 {
        harness
            .send(
                &alice,
                "chat.message",
                json!({"conversationId": 10, "content": "ping"}),
            )
            .await;
    }

    assert_eq!(harness.unread.get(10, 2), 3);
    assert_eq!(harness.unread.get(10, 3), 3);

    let synced = harness
        .unread
        .sync_to_database(harness.participants.as_ref())
        .await;
    assert_eq!(synced, 2);

    let mut written = harness.participants.written();
    written.sort_unstable();
    assert_eq!(written, vec![(10, 2, 3), (10, 3, 3)]);
}

#[tokio::test]
async fn eleventh_login_attempt_in_one_window_is_rejected() {
    let harness = TestHarness::new(InMemoryConversationRepository::default());
    let limiter = &harness.limiters.auth;
    let now = 1_000_020;

    for attempt in 1..=10u64 {
        let info = limiter
            .try_acquire_at("ip:203.0.113.7", now)
            .unwrap_or_else(|_| panic!("attempt {attempt} should be admitted"));
        assert_eq!(info.remaining, 10 - attempt);
    }

    let rejected = limiter
        .try_acquire_at("ip:203.0.113.7", now)
        .expect_err("eleventh attempt rejected");
    assert_eq!(rejected.remaining, 0);
    assert!(rejected.retry_after > 0);

    // A different client is unaffected, and the next window starts clean.
    assert!(limiter.try_acquire_at("ip:198.51.100.4", now).is_ok());
    assert!(limiter.try_acquire_at("ip:203.0.113.7", now + 60).is_ok());
}
