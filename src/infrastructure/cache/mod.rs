//! In-process caches and buffers.

pub mod message_buffer;
pub mod presence_cache;
pub mod unread_cache;

pub use message_buffer::{FlushReport, MessageBuffer};
pub use presence_cache::PresenceCache;
pub use unread_cache::UnreadCountCache;
