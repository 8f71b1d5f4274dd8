//! Presentation layer: HTTP routes, middleware, and the WebSocket gateway.

pub mod http;
pub mod middleware;
pub mod websocket;
