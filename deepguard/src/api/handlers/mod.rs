//! Axum handler functions, grouped by concern.

pub mod auth;
pub mod detect;
pub mod health;
pub mod history;
