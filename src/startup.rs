//! Application Startup
//!
//! Application building, handler registration, background tasks, and
//! server initialization. Handler registration happens before the
//! listener binds so a wiring mistake fails startup instead of
//! surfacing on the first frame.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::application::services::{call_service, CallService, TypingService};
use crate::config::Settings;
use crate::domain::{
    CallRepository, ConversationRepository, MessageRepository, ParticipantRepository,
};
use crate::infrastructure::cache::{
    message_buffer, unread_cache, MessageBuffer, PresenceCache, UnreadCountCache,
};
use crate::infrastructure::database;
use crate::infrastructure::repositories::{
    PgCallRepository, PgConversationRepository, PgMessageRepository, PgParticipantRepository,
};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::cors;
use crate::presentation::middleware::rate_limit::{self, RateLimiters};
use crate::presentation::websocket::handlers::{
    CallAcceptHandler, CallEndHandler, CallInitiateHandler, CallRejectHandler, ChatMessageHandler,
    HeartbeatHandler, TypingStartHandler, TypingStopHandler,
};
use crate::presentation::websocket::{ConnectionRegistry, Dispatcher, DispatcherBuilder, EventHub};
use crate::shared::snowflake::SnowflakeGenerator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub settings: Arc<Settings>,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Arc<EventHub>,
    pub dispatcher: Arc<Dispatcher>,
    pub typing: Arc<TypingService>,
    pub calls: Arc<CallService>,
    pub message_buffer: Arc<MessageBuffer>,
    pub unread: Arc<UnreadCountCache>,
    pub presence: Arc<PresenceCache>,
    pub limiters: Arc<RateLimiters>,
    pub participants: Arc<dyn ParticipantRepository>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        // Fix the uptime baseline before any traffic arrives
        health::init_server_start();

        // Create database pool
        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");

        database::run_migrations(&db).await?;
        tracing::info!("Database migrations applied");

        let state = Self::build_state(settings, db)?;
        Self::spawn_background_tasks(&state);

        // Build router with middleware
        let router = routes::create_router(state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(cors::create_cors_layer(&state.settings.cors));

        // Bind to address
        let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.server.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            state,
        })
    }

    /// Wire repositories, services, and the frame dispatcher.
    ///
    /// Exposed for integration tests, which substitute their own pool.
    pub fn build_state(settings: Settings, db: PgPool) -> Result<AppState> {
        let settings = Arc::new(settings);

        let conversations: Arc<dyn ConversationRepository> =
            Arc::new(PgConversationRepository::new(db.clone()));
        let messages: Arc<dyn MessageRepository> = Arc::new(PgMessageRepository::new(db.clone()));
        let participants: Arc<dyn ParticipantRepository> =
            Arc::new(PgParticipantRepository::new(db.clone()));
        let call_repo: Arc<dyn CallRepository> = Arc::new(PgCallRepository::new(db.clone()));

        let snowflake = Arc::new(SnowflakeGenerator::new(
            settings.snowflake.machine_id as u64,
            settings.snowflake.node_id as u64,
        ));

        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(EventHub::new(registry.clone()));
        let typing = Arc::new(TypingService::new());
        let presence = Arc::new(PresenceCache::new(registry.clone()));
        let limiters = Arc::new(RateLimiters::from_settings(&settings.rate_limit));
        let message_buffer = Arc::new(MessageBuffer::new(
            messages.clone(),
            settings.buffer.batch_threshold,
        ));
        let unread = Arc::new(UnreadCountCache::new());
        let calls = Arc::new(CallService::new(
            call_repo,
            hub.clone(),
            Duration::from_secs(settings.call.ring_timeout_secs),
        ));

        let dispatcher = Arc::new(build_dispatcher(
            conversations,
            messages,
            message_buffer.clone(),
            unread.clone(),
            hub.clone(),
            snowflake.clone(),
            limiters.clone(),
            typing.clone(),
            calls.clone(),
            registry.clone(),
        )?);
        tracing::info!(
            types = ?dispatcher.handled_types(),
            "Frame dispatcher registered"
        );

        Ok(AppState {
            db,
            settings,
            snowflake,
            registry,
            hub,
            dispatcher,
            typing,
            calls,
            message_buffer,
            unread,
            presence,
            limiters,
            participants,
        })
    }

    /// Spawn the periodic loops: buffer flush, unread sync, call timeout
    /// sweep, and limiter pruning.
    pub fn spawn_background_tasks(state: &AppState) {
        tokio::spawn(message_buffer::run_flush_task(
            state.message_buffer.clone(),
            state.settings.buffer.flush_interval_secs,
        ));
        tokio::spawn(unread_cache::run_sync_task(
            state.unread.clone(),
            state.participants.clone(),
            state.settings.unread.sync_interval_secs,
        ));
        tokio::spawn(call_service::run_timeout_sweep(
            state.calls.clone(),
            state.settings.call.sweep_interval_secs,
        ));
        tokio::spawn(rate_limit::run_prune_task(
            state.limiters.clone(),
            state.settings.rate_limit.api_window_seconds.max(60),
        ));
    }

    /// Run the server until stopped, then drain in-memory state.
    pub async fn run_until_stopped(self) -> Result<()> {
        let state = self.state.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // Final drain so a clean shutdown loses nothing buffered.
        let report = state.message_buffer.flush().await;
        let synced = state
            .unread
            .sync_to_database(state.participants.as_ref())
            .await;
        tracing::info!(
            flushed = report.flushed,
            failed = report.failed,
            unread_synced = synced,
            "Shutdown drain complete"
        );
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Register one handler per inbound frame type.
#[allow(clippy::too_many_arguments)]
fn build_dispatcher(
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    message_buffer: Arc<MessageBuffer>,
    unread: Arc<UnreadCountCache>,
    hub: Arc<EventHub>,
    snowflake: Arc<SnowflakeGenerator>,
    limiters: Arc<RateLimiters>,
    typing: Arc<TypingService>,
    calls: Arc<CallService>,
    registry: Arc<ConnectionRegistry>,
) -> Result<Dispatcher> {
    Ok(DispatcherBuilder::new()
        .register(Arc::new(ChatMessageHandler::new(
            conversations.clone(),
            messages,
            message_buffer,
            unread,
            hub.clone(),
            snowflake,
            limiters.clone(),
        )))?
        .register(Arc::new(TypingStartHandler::new(
            conversations.clone(),
            typing.clone(),
            hub.clone(),
        )))?
        .register(Arc::new(TypingStopHandler::new(
            conversations,
            typing,
            hub,
        )))?
        .register(Arc::new(HeartbeatHandler::new(registry)))?
        .register(Arc::new(CallInitiateHandler::new(
            calls.clone(),
            limiters,
        )))?
        .register(Arc::new(CallAcceptHandler::new(calls.clone())))?
        .register(Arc::new(CallRejectHandler::new(calls.clone())))?
        .register(Arc::new(CallEndHandler::new(calls)))?
        .build())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| tracing::error!(error = %e, "Failed to install Ctrl+C handler"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
