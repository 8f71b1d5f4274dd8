//! Application services.

pub mod call_service;
pub mod typing_service;

pub use call_service::{CallError, CallService};
pub use typing_service::TypingService;
