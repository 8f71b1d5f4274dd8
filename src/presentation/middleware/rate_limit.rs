//! Rate Limiting Middleware
//!
//! In-process fixed-window rate limiting. Each (key, window) pair holds a
//! single counter; a request in a new window resets the counter instead of
//! spawning per-key expiry timers. Stale windows are evicted lazily and by
//! a periodic prune.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::ExtensionRejection, ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::settings::RateLimitSettings;
use crate::presentation::middleware::auth::AuthUser;
use crate::shared::error::ErrorResponse;
use crate::startup::AppState;

// ============================================================================
// Rate Limit Configuration
// ============================================================================

/// Which limiter a piece of traffic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    /// Authentication endpoints, strict limits against brute force
    Auth,
    /// Standard API endpoints
    Api,
    /// Chat messages over the WebSocket, per user
    Chat,
    /// Call initiations, per user
    Call,
}

/// Information about rate limit status returned to clients.
#[derive(Debug, Serialize)]
pub struct RateLimitInfo {
    /// Maximum requests allowed in the current window
    pub limit: u64,
    /// Remaining requests in the current window
    pub remaining: u64,
    /// Unix timestamp when the current window ends
    pub reset_at: i64,
    /// Seconds until the window ends
    pub retry_after: u64,
}

/// Rate limit exceeded error response.
#[derive(Debug, Serialize)]
struct RateLimitExceededResponse {
    #[serde(flatten)]
    error: ErrorResponse,
    rate_limit: RateLimitInfo,
}

// ============================================================================
// Fixed-Window Limiter
// ============================================================================

#[derive(Debug)]
struct WindowSlot {
    window_index: i64,
    count: u64,
}

/// Fixed-window counter keyed by an opaque identifier.
///
/// A key's slot records which window it was last seen in; a request from a
/// later window overwrites the slot rather than waiting for an expiry.
/// This admits up to 2x the limit across a window boundary, which is an
/// accepted property of the algorithm.
pub struct FixedWindowLimiter {
    max_requests: u64,
    window_seconds: u64,
    slots: DashMap<String, WindowSlot>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u64, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds: window_seconds.max(1),
            slots: DashMap::new(),
        }
    }

    /// Try to admit one request for `key` at the current time.
    pub fn try_acquire(&self, key: &str) -> Result<RateLimitInfo, RateLimitInfo> {
        self.try_acquire_at(key, Utc::now().timestamp())
    }

    /// Try to admit one request for `key` at the given unix time.
    pub fn try_acquire_at(&self, key: &str, now_secs: i64) -> Result<RateLimitInfo, RateLimitInfo> {
        let window_index = now_secs.div_euclid(self.window_seconds as i64);
        let reset_at = (window_index + 1) * self.window_seconds as i64;

        let mut slot = self.slots.entry(key.to_string()).or_insert(WindowSlot {
            window_index,
            count: 0,
        });
        if slot.window_index != window_index {
            slot.window_index = window_index;
            slot.count = 0;
        }

        if slot.count < self.max_requests {
            slot.count += 1;
            Ok(RateLimitInfo {
                limit: self.max_requests,
                remaining: self.max_requests - slot.count,
                reset_at,
                retry_after: 0,
            })
        } else {
            Err(RateLimitInfo {
                limit: self.max_requests,
                remaining: 0,
                reset_at,
                retry_after: (reset_at - now_secs).max(1) as u64,
            })
        }
    }

    /// Drop slots whose window has passed. Called periodically so idle
    /// keys do not accumulate forever.
    pub fn prune(&self) {
        let current_window = Utc::now().timestamp().div_euclid(self.window_seconds as i64);
        self.slots
            .retain(|_, slot| slot.window_index >= current_window);
    }

    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }
}

/// The application's limiters, one per traffic class.
pub struct RateLimiters {
    pub api: FixedWindowLimiter,
    pub auth: FixedWindowLimiter,
    pub chat: FixedWindowLimiter,
    pub call: FixedWindowLimiter,
}

impl RateLimiters {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            api: FixedWindowLimiter::new(settings.api_max_requests, settings.api_window_seconds),
            auth: FixedWindowLimiter::new(settings.auth_max_requests, settings.auth_window_seconds),
            chat: FixedWindowLimiter::new(settings.chat_max_requests, settings.chat_window_seconds),
            call: FixedWindowLimiter::new(settings.call_max_requests, settings.call_window_seconds),
        }
    }

    pub fn get(&self, endpoint_type: EndpointType) -> &FixedWindowLimiter {
        match endpoint_type {
            EndpointType::Api => &self.api,
            EndpointType::Auth => &self.auth,
            EndpointType::Chat => &self.chat,
            EndpointType::Call => &self.call,
        }
    }

    pub fn prune_all(&self) {
        self.api.prune();
        self.auth.prune();
        self.chat.prune();
        self.call.prune();
    }
}

/// Periodic prune loop, spawned at startup.
pub async fn run_prune_task(limiters: Arc<RateLimiters>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        limiters.prune_all();
    }
}

// ============================================================================
// Identifier Extraction
// ============================================================================

/// Extract the rate limit identifier from a request.
///
/// Priority:
/// 1. Authenticated user ID (cannot be spoofed)
/// 2. X-Forwarded-For header (for reverse proxy setups)
/// 3. Client IP address (fallback)
fn extract_identifier(request: &Request, client_ip: Option<IpAddr>) -> String {
    if let Some(auth_user) = request.extensions().get::<AuthUser>() {
        return format!("user:{}", auth_user.user_id);
    }

    // Note: X-Forwarded-For should only be trusted behind a known proxy
    if let Some(forwarded_for) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            let ip = first_ip.trim();
            if ip.parse::<IpAddr>().is_ok() {
                return format!("ip:{}", ip);
            }
        }
    }

    match client_ip {
        Some(ip) => format!("ip:{}", ip),
        None => {
            tracing::warn!("Could not determine client identifier for rate limiting");
            "ip:unknown".to_string()
        }
    }
}

// ============================================================================
// Middleware Functions
// ============================================================================

/// Rate limiting middleware for authentication endpoints.
pub async fn rate_limit_auth(
    State(state): State<AppState>,
    connect_info: Result<ConnectInfo<std::net::SocketAddr>, ExtensionRejection>,
    request: Request,
    next: Next,
) -> Response {
    rate_limit_inner(state, connect_info.ok(), request, next, EndpointType::Auth).await
}

/// Rate limiting middleware for standard API endpoints.
pub async fn rate_limit_api(
    State(state): State<AppState>,
    connect_info: Result<ConnectInfo<std::net::SocketAddr>, ExtensionRejection>,
    request: Request,
    next: Next,
) -> Response {
    rate_limit_inner(state, connect_info.ok(), request, next, EndpointType::Api).await
}

/// Rate limiting middleware for call initiation endpoints.
pub async fn rate_limit_call(
    State(state): State<AppState>,
    connect_info: Result<ConnectInfo<std::net::SocketAddr>, ExtensionRejection>,
    request: Request,
    next: Next,
) -> Response {
    rate_limit_inner(state, connect_info.ok(), request, next, EndpointType::Call).await
}

/// Internal rate limiting implementation.
async fn rate_limit_inner(
    state: AppState,
    connect_info: Option<ConnectInfo<std::net::SocketAddr>>,
    request: Request,
    next: Next,
    endpoint_type: EndpointType,
) -> Response {
    let client_ip = connect_info.map(|ci| ci.0.ip());
    let identifier = extract_identifier(&request, client_ip);

    match state.limiters.get(endpoint_type).try_acquire(&identifier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            add_rate_limit_headers(response.headers_mut(), &info);
            response
        }
        Err(info) => {
            tracing::warn!(
                identifier = %identifier,
                endpoint_type = ?endpoint_type,
                "Rate limit exceeded"
            );
            create_rate_limit_response(info)
        }
    }
}

/// Add rate limit headers to a response.
fn add_rate_limit_headers(headers: &mut header::HeaderMap, info: &RateLimitInfo) {
    if let Ok(v) = header::HeaderValue::from_str(&info.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = header::HeaderValue::from_str(&info.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = header::HeaderValue::from_str(&info.reset_at.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

/// Create a 429 Too Many Requests response.
fn create_rate_limit_response(info: RateLimitInfo) -> Response {
    let retry_after = info.retry_after;
    let body = RateLimitExceededResponse {
        error: ErrorResponse {
            code: 10006,
            message: "You are being rate limited. Please slow down.".to_string(),
        },
        rate_limit: info,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

    if let Ok(v) = header::HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, v);
    }
    response
}

// ============================================================================
// Tests
// ============================================================================
