//! HTTP request handlers.

pub mod admin;
pub mod call;
pub mod health;
