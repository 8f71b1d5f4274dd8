//! Inbound message handlers, one per frame type.

pub mod call;
pub mod chat;
pub mod heartbeat;
pub mod typing;

pub use call::{CallAcceptHandler, CallEndHandler, CallInitiateHandler, CallRejectHandler};
pub use chat::ChatMessageHandler;
pub use heartbeat::HeartbeatHandler;
pub use typing::{TypingStartHandler, TypingStopHandler};
