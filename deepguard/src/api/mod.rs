//! HTTP API surface.
//!
//! [`handlers`] holds the axum handler functions; [`models`] the request/response
//! types they exchange with clients.

pub mod handlers;
pub mod models;
