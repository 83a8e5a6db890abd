//! S3-compatible object storage for uploaded images.
//!
//! Works against Cloudflare R2, MinIO, or AWS S3 proper. The storage section of the
//! config is optional; when it is absent, uploads stay on the local filesystem and this
//! module is never constructed.

use aws_config::Region;
use aws_sdk_s3::{config::Credentials, primitives::ByteStream};
use bytes::Bytes;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::{config::StorageConfig, errors::Error};

/// A stored object: the bucket key plus the public URL it is served from.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

pub struct ObjectStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_url: String,
}

impl ObjectStorage {
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "deepguard",
        );
        // R2 ignores the region but the SDK requires one
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version_latest()
            .region(Region::new("auto"))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Upload image bytes under a timestamped key and return the key and public URL.
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, filename = %filename, size = bytes.len()), err)]
    pub async fn put(&self, bytes: Bytes, filename: &str) -> Result<StoredObject, Error> {
        let key = object_key(filename);
        let content_type = content_type_for(filename);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::Internal {
                operation: format!("upload object to bucket {}: {e}", self.bucket),
            })?;

        let url = format!("{}/{}", self.public_url, key);
        Ok(StoredObject { key, url })
    }

    /// Delete an object by key.
    ///
    /// Returns whether the delete call succeeded. Failures are logged but never
    /// propagated: reclamation of remote bytes is best-effort.
    #[instrument(skip(self), fields(bucket = %self.bucket, key = %key))]
    pub async fn delete(&self, key: &str) -> bool {
        match self.client.delete_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to delete object {key} from bucket {}: {e}", self.bucket);
                false
            }
        }
    }
}

/// Bucket key for an uploaded file: `uploads/{epoch_millis}-{filename}`.
fn object_key(filename: &str) -> String {
    format!("uploads/{}-{}", Utc::now().timestamp_millis(), filename)
}

/// MIME type derived from the file extension, falling back to a generic binary type.
fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename).first_or_octet_stream().essence_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_shape() {
        let key = object_key("photo.jpg");

        assert!(key.starts_with("uploads/"));
        assert!(key.ends_with("-photo.jpg"));

        // Millisecond timestamp between prefix and filename
        let middle = key.strip_prefix("uploads/").unwrap().strip_suffix("-photo.jpg").unwrap();
        assert!(middle.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_content_type_for_known_extensions() {
        assert_eq!(content_type_for("a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.gif"), "image/gif");
        assert_eq!(content_type_for("a.webp"), "image/webp");
    }

    #[test]
    fn test_content_type_fallback() {
        assert_eq!(content_type_for("archive.unknownext"), "application/octet-stream");
        assert_eq!(content_type_for("no_extension"), "application/octet-stream");
    }
}
