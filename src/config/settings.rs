//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// JWT authentication settings
    pub jwt: JwtSettings,

    /// Snowflake ID generator settings
    pub snowflake: SnowflakeSettings,

    /// Rate limiting configuration
    pub rate_limit: RateLimitSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// Call signaling configuration
    pub call: CallSettings,

    /// Write-behind message buffer configuration
    pub buffer: BufferSettings,

    /// Unread-count cache configuration
    pub unread: UnreadSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key for verifying tokens
    pub secret: String,
}

/// Snowflake ID generator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeSettings {
    /// Machine/worker ID (0-31)
    pub machine_id: u16,

    /// Node ID within the machine (0-31)
    pub node_id: u16,
}

/// Rate limiting configuration.
///
/// Each pair is (max requests, window length in seconds) for one
/// fixed-window limiter.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// General API requests per client
    pub api_max_requests: u64,
    pub api_window_seconds: u64,

    /// Authentication attempts per client
    pub auth_max_requests: u64,
    pub auth_window_seconds: u64,

    /// Chat messages per user over the WebSocket
    pub chat_max_requests: u64,
    pub chat_window_seconds: u64,

    /// Call initiations per user
    pub call_max_requests: u64,
    pub call_window_seconds: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Maximum frame size in bytes (default: 16KB)
    pub max_frame_size: usize,

    /// Seconds without any inbound activity before a connection is
    /// considered dead and closed by the liveness sweep
    pub liveness_timeout_secs: u64,

    /// How often the liveness sweep runs, in seconds
    pub liveness_sweep_secs: u64,
}

/// Call signaling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CallSettings {
    /// Seconds a call may ring before it times out
    pub ring_timeout_secs: u64,

    /// How often the timeout sweep runs, in seconds
    pub sweep_interval_secs: u64,
}

/// Write-behind message buffer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferSettings {
    /// How often the periodic flush runs, in seconds
    pub flush_interval_secs: u64,

    /// Buffer depth that triggers an immediate flush
    pub batch_threshold: usize,
}

/// Unread-count cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UnreadSettings {
    /// How often dirty counters are synced to the database, in seconds
    pub sync_interval_secs: u64,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("snowflake.machine_id", 1)?
            .set_default("snowflake.node_id", 0)?
            .set_default("rate_limit.api_max_requests", 100)?
            .set_default("rate_limit.api_window_seconds", 60)?
            .set_default("rate_limit.auth_max_requests", 10)?
            .set_default("rate_limit.auth_window_seconds", 60)?
            .set_default("rate_limit.chat_max_requests", 30)?
            .set_default("rate_limit.chat_window_seconds", 60)?
            .set_default("rate_limit.call_max_requests", 5)?
            .set_default("rate_limit.call_window_seconds", 60)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.max_frame_size", 16384_i64)? // 16KB
            .set_default("websocket.liveness_timeout_secs", 90_i64)?
            .set_default("websocket.liveness_sweep_secs", 30_i64)?
            .set_default("call.ring_timeout_secs", 60_i64)?
            .set_default("call.sweep_interval_secs", 5_i64)?
            .set_default("buffer.flush_interval_secs", 30_i64)?
            .set_default("buffer.batch_threshold", 500_i64)?
            .set_default("unread.sync_interval_secs", 30_i64)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option(
                "snowflake.machine_id",
                std::env::var("SNOWFLAKE_MACHINE_ID").ok(),
            )?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                // Validate JWT secret length for security
                if settings.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
                    return Err(ConfigError::Message(format!(
                        "JWT secret must be at least {} characters for security. Current length: {}",
                        MIN_JWT_SECRET_LENGTH,
                        settings.jwt.secret.len()
                    )));
                }
                Ok(settings)
            })
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl DatabaseSettings {
    /// Get the connection URL.
    pub fn connection_url(&self) -> &str {
        &self.url
    }
}
