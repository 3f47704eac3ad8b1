//! HTTP request handlers.

pub mod bakeforms;
pub mod health;
