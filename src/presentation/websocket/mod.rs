//! WebSocket layer.
//!
//! Frame envelope, connection registry, inbound dispatcher, outbound event
//! hub, and the per-type message handlers.

pub mod connection;
pub mod dispatcher;
pub mod frames;
pub mod handlers;
pub mod hub;
pub mod registry;

pub use connection::ws_handler;
pub use dispatcher::{ConnectionContext, Dispatcher, DispatcherBuilder, HandlerError, MessageHandler};
pub use frames::Frame;
pub use hub::EventHub;
pub use registry::ConnectionRegistry;
