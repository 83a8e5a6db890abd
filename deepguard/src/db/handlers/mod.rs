//! Database handlers implementing the repository pattern.
//!
//! Each handler wraps a `&mut PgConnection`, so callers choose whether operations run
//! on a pool connection or inside a transaction.

pub mod detections;
pub mod repository;
pub mod users;

pub use detections::{DetectionFilter, Detections};
pub use repository::Repository;
pub use users::{UserFilter, Users};
