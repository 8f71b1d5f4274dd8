//! # Domain Layer
//!
//! Core entities of the real-time subsystem and the repository traits the
//! persistence collaborator must implement. The traits are the only thing
//! the real-time layer knows about storage.

pub mod entities;

pub use entities::*;
