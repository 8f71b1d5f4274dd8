//! Middleware
//!
//! Tower middleware for request processing.

pub mod auth;
pub mod cors;
pub mod metrics;
pub mod rate_limit;

pub use auth::{auth_middleware, verify_token, AuthUser, Claims};
pub use metrics::track_metrics;
pub use rate_limit::{
    rate_limit_api, rate_limit_auth, rate_limit_call, EndpointType, FixedWindowLimiter,
    RateLimitInfo, RateLimiters,
};
