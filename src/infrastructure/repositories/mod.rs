//! Repository Implementations
//!
//! PostgreSQL-backed implementations of the domain repository traits.

pub mod call_repository;
pub mod conversation_repository;
pub mod message_repository;

pub use call_repository::PgCallRepository;
pub use conversation_repository::{PgConversationRepository, PgParticipantRepository};
pub use message_repository::PgMessageRepository;
