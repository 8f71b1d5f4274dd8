//! Infrastructure layer.

pub mod cache;
pub mod database;
pub mod metrics;
pub mod repositories;
