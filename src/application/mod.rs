//! Application layer.

pub mod services;

pub use services::*;
