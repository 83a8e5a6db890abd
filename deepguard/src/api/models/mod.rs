//! Request and response models for the HTTP API.

pub mod auth;
pub mod detections;
pub mod pagination;
pub mod users;
