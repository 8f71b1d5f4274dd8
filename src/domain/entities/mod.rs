//! Domain entities and repository traits.

mod call;
mod conversation;
mod message;

pub use call::*;
pub use conversation::*;
pub use message::*;
