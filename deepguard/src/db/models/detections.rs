//! Database models for detection records.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::DetectionId;

/// Where the analyzed image ended up.
///
/// Flattened into `storage_kind` / `local_path` / `remote_key` / `remote_url` columns;
/// a table constraint keeps the columns consistent with the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageLocation {
    /// Stored on the server's local filesystem, served from `/uploads`
    Local { path: String },
    /// Stored in the configured object storage bucket
    Remote { key: String, url: String },
}

impl StorageLocation {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageLocation::Local { .. } => "local",
            StorageLocation::Remote { .. } => "remote",
        }
    }

    /// The URL clients can fetch the image from.
    pub fn public_url(&self) -> String {
        match self {
            StorageLocation::Local { path } => format!("/uploads/{path}"),
            StorageLocation::Remote { url, .. } => url.clone(),
        }
    }
}

/// Request to persist a completed detection.
#[derive(Debug, Clone, Builder)]
pub struct DetectionCreateDBRequest {
    /// Filename as supplied by the uploader
    pub original_filename: String,
    /// "real" or "fake"
    pub prediction: String,
    /// Confidence in the prediction, 0-100
    pub confidence: f64,
    /// Raw model output before thresholding
    pub raw_score: f64,
    /// Where the image bytes live
    pub storage: StorageLocation,
    /// Upload size in bytes
    pub size_bytes: i64,
    /// Inference wall-clock time in milliseconds
    pub duration_ms: i64,
    /// Identifier of the model that produced the verdict
    pub model_id: String,
}

/// A detection row as stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DetectionDBResponse {
    pub id: DetectionId,
    pub original_filename: String,
    pub prediction: String,
    pub confidence: f64,
    pub raw_score: f64,
    pub storage_kind: String,
    pub local_path: Option<String>,
    pub remote_key: Option<String>,
    pub remote_url: Option<String>,
    pub size_bytes: i64,
    pub duration_ms: i64,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

impl DetectionDBResponse {
    /// Reassemble the tagged storage location from its columns.
    pub fn storage(&self) -> StorageLocation {
        match (self.storage_kind.as_str(), &self.remote_key, &self.remote_url) {
            ("remote", Some(key), Some(url)) => StorageLocation::Remote {
                key: key.clone(),
                url: url.clone(),
            },
            _ => StorageLocation::Local {
                path: self.local_path.clone().unwrap_or_default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_location_kind_and_url() {
        let local = StorageLocation::Local {
            path: "abc123.jpg".to_string(),
        };
        assert_eq!(local.kind(), "local");
        assert_eq!(local.public_url(), "/uploads/abc123.jpg");

        let remote = StorageLocation::Remote {
            key: "uploads/123-a.jpg".to_string(),
            url: "https://images.example.com/uploads/123-a.jpg".to_string(),
        };
        assert_eq!(remote.kind(), "remote");
        assert_eq!(remote.public_url(), "https://images.example.com/uploads/123-a.jpg");
    }
}
