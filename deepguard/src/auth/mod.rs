//! Authentication and authorization.
//!
//! This module covers the full credential lifecycle:
//!
//! - [`password`] - Argon2 password hashing and reset token generation
//! - [`session`] - JWT session token creation and verification
//! - [`current_user`] - Axum extractor resolving the authenticated user from a request

pub mod current_user;
pub mod password;
pub mod session;

pub use crate::api::models::users::CurrentUser;
