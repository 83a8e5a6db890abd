//! Pagination metadata for list endpoints.
//!
//! The history endpoint uses page-number pagination (`page` and `limit` query
//! parameters) and returns a metadata block alongside the items.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default number of items to return per page.
pub const DEFAULT_LIMIT: i64 = 20;

/// Maximum number of items that can be requested per page.
pub const MAX_LIMIT: i64 = 100;

/// Pagination metadata returned with paginated responses.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginationMeta {
    /// Current page (1-based)
    pub page: i64,
    /// Items per page
    pub limit: i64,
    /// Total number of items matching the query
    pub total: i64,
    /// Total number of pages
    pub pages: i64,
}

impl PaginationMeta {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: if limit > 0 { (total + limit - 1) / limit } else { 0 },
        }
    }
}
