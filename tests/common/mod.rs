//! Common Test Utilities
//!
//! In-memory repository implementations and a wired-up harness that
//! drives the frame dispatcher the way the socket loop does, with
//! channel-backed connections instead of real sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use chat_relay::application::services::{CallService, TypingService};
use chat_relay::config::settings::RateLimitSettings;
use chat_relay::domain::{
    Call, CallRepository, Conversation, ConversationRepository, Message, MessageRepository,
    ParticipantRepository,
};
use chat_relay::infrastructure::cache::{MessageBuffer, UnreadCountCache};
use chat_relay::presentation::middleware::rate_limit::RateLimiters;
use chat_relay::presentation::websocket::handlers::{
    CallAcceptHandler, CallEndHandler, CallInitiateHandler, CallRejectHandler, ChatMessageHandler,
    HeartbeatHandler, TypingStartHandler, TypingStopHandler,
};
use chat_relay::presentation::websocket::{
    ConnectionContext, ConnectionRegistry, Dispatcher, DispatcherBuilder, EventHub, Frame,
};
use chat_relay::shared::error::AppError;
use chat_relay::shared::snowflake::SnowflakeGenerator;

// ============================================================================
// In-memory repositories
// ============================================================================

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: Mutex<HashMap<i64, Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn with_conversation(self, id: i64, participant_ids: Vec<i64>) -> Self {
        self.conversations.lock().insert(
            id,
            Conversation {
                id,
                participant_ids,
                last_message_id: None,
                updated_at: Utc::now(),
            },
        );
        self
    }

    pub fn last_message_id(&self, id: i64) -> Option<i64> {
        self.conversations
            .lock()
            .get(&id)
            .and_then(|c| c.last_message_id)
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_with_participants(&self, id: i64) -> Result<Option<Conversation>, AppError> {
        Ok(self.conversations.lock().get(&id).cloned())
    }

    async fn update_last_message(&self, id: i64, message: &Message) -> Result<(), AppError> {
        let mut conversations = self.conversations.lock();
        let conversation = conversations
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("conversation".into()))?;
        conversation.last_message_id = Some(message.id);
        conversation.updated_at = message.sent_at;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: Mutex<HashMap<i64, Message>>,
}

impl InMemoryMessageRepository {
    pub fn stored_count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(&self, message: &Message) -> Result<(), AppError> {
        self.messages.lock().insert(message.id, message.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Message>, AppError> {
        Ok(self.messages.lock().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCallRepository {
    calls: Mutex<HashMap<String, Call>>,
}

impl InMemoryCallRepository {
    pub fn get(&self, id: &str) -> Option<Call> {
        self.calls.lock().get(id).cloned()
    }
}

#[async_trait]
impl CallRepository for InMemoryCallRepository {
    async fn insert(&self, call: &Call) -> Result<(), AppError> {
        self.calls.lock().insert(call.id.clone(), call.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Call>, AppError> {
        Ok(self.calls.lock().get(id).cloned())
    }

    async fn update(&self, call: &Call) -> Result<(), AppError> {
        self.calls.lock().insert(call.id.clone(), call.clone());
        Ok(())
    }

    async fn find_active_by_user(&self, user_id: i64) -> Result<Option<Call>, AppError> {
        Ok(self
            .calls
            .lock()
            .values()
            .find(|c| c.is_participant(user_id) && !c.status.is_terminal())
            .cloned())
    }

    async fn find_ringing_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Call>, AppError> {
        Ok(self
            .calls
            .lock()
            .values()
            .filter(|c| !c.status.is_terminal() && c.accepted_at.is_none())
            .filter(|c| c.started_at < cutoff)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryParticipantRepository {
    writes: Mutex<Vec<(i64, i64, i64)>>,
}

impl InMemoryParticipantRepository {
    pub fn written(&self) -> Vec<(i64, i64, i64)> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryParticipantRepository {
    async fn set_unread_count(
        &self,
        conversation_id: i64,
        user_id: i64,
        count: i64,
    ) -> Result<(), AppError> {
        self.writes.lock().push((conversation_id, user_id, count));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// One connected test client: its outbound receiver and the context the
/// dispatcher is driven with.
pub struct TestClient {
    pub ctx: ConnectionContext,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl TestClient {
    /// Drain everything currently queued for this client.
    pub fn drain(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }

    /// Next frame of the given type, skipping others.
    pub fn next_of_type(&mut self, frame_type: &str) -> Option<Frame> {
        self.drain().into_iter().find(|f| f.frame_type == frame_type)
    }
}

pub struct TestHarness {
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Arc<EventHub>,
    pub dispatcher: Dispatcher,
    pub conversations: Arc<InMemoryConversationRepository>,
    pub messages: Arc<InMemoryMessageRepository>,
    pub call_repo: Arc<InMemoryCallRepository>,
    pub participants: Arc<InMemoryParticipantRepository>,
    pub buffer: Arc<MessageBuffer>,
    pub unread: Arc<UnreadCountCache>,
    pub typing: Arc<TypingService>,
    pub calls: Arc<CallService>,
    pub limiters: Arc<RateLimiters>,
}

pub fn rate_limit_settings() -> RateLimitSettings {
    RateLimitSettings {
        api_max_requests: 100,
        api_window_seconds: 60,
        auth_max_requests: 10,
        auth_window_seconds: 60,
        chat_max_requests: 30,
        chat_window_seconds: 60,
        call_max_requests: 5,
        call_window_seconds: 60,
    }
}

impl TestHarness {
    pub fn new(conversations: InMemoryConversationRepository) -> Self {
        Self::with_ring_timeout(conversations, Duration::from_secs(60))
    }

    pub fn with_ring_timeout(
        conversations: InMemoryConversationRepository,
        ring_timeout: Duration,
    ) -> Self {
        let conversations = Arc::new(conversations);
        let messages = Arc::new(InMemoryMessageRepository::default());
        let call_repo = Arc::new(InMemoryCallRepository::default());
        let participants = Arc::new(InMemoryParticipantRepository::default());

        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(EventHub::new(registry.clone()));
        let buffer = Arc::new(MessageBuffer::new(
            messages.clone() as Arc<dyn MessageRepository>,
            500,
        ));
        let unread = Arc::new(UnreadCountCache::new());
        let typing = Arc::new(TypingService::new());
        let limiters = Arc::new(RateLimiters::from_settings(&rate_limit_settings()));
        let snowflake = Arc::new(SnowflakeGenerator::new(1, 0));
        let calls = Arc::new(CallService::new(
            call_repo.clone() as Arc<dyn CallRepository>,
            hub.clone(),
            ring_timeout,
        ));

        let dispatcher = DispatcherBuilder::new()
            .register(Arc::new(ChatMessageHandler::new(
                conversations.clone() as Arc<dyn ConversationRepository>,
                messages.clone() as Arc<dyn MessageRepository>,
                buffer.clone(),
                unread.clone(),
                hub.clone(),
                snowflake,
                limiters.clone(),
            )))
            .unwrap()
            .register(Arc::new(TypingStartHandler::new(
                conversations.clone() as Arc<dyn ConversationRepository>,
                typing.clone(),
                hub.clone(),
            )))
            .unwrap()
            .register(Arc::new(TypingStopHandler::new(
                conversations.clone() as Arc<dyn ConversationRepository>,
                typing.clone(),
                hub.clone(),
            )))
            .unwrap()
            .register(Arc::new(HeartbeatHandler::new(registry.clone())))
            .unwrap()
            .register(Arc::new(CallInitiateHandler::new(
                calls.clone(),
                limiters.clone(),
            )))
            .unwrap()
            .register(Arc::new(CallAcceptHandler::new(calls.clone())))
            .unwrap()
            .register(Arc::new(CallRejectHandler::new(calls.clone())))
            .unwrap()
            .register(Arc::new(CallEndHandler::new(calls.clone())))
            .unwrap()
            .build();

        Self {
            registry,
            hub,
            dispatcher,
            conversations,
            messages,
            call_repo,
            participants,
            buffer,
            unread,
            typing,
            calls,
            limiters,
        }
    }

    /// Connect a user the way the socket loop does: register an outbound
    /// channel and build the dispatch context.
    pub fn connect(&self, user_id: i64) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = self.registry.register(user_id, tx.clone());
        TestClient {
            ctx: ConnectionContext::new(user_id, connection_id, tx),
            rx,
        }
    }

    /// Dispatch one inbound frame on behalf of a connected client.
    pub async fn send(&self, client: &TestClient, frame_type: &str, payload: serde_json::Value) {
        self.dispatcher
            .dispatch(&client.ctx, Frame::new(frame_type, payload))
            .await;
    }
}
