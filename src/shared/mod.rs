//! Shared Utilities
//!
//! Common types used across all layers: error handling and ID generation.

pub mod error;
pub mod snowflake;
