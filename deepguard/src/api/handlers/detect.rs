//! Image submission and classification.
//!
//! A submission runs through four steps: spool the upload to disk, run the classifier,
//! move the bytes to their long-term home (object storage when configured), and
//! persist the detection record. A classifier failure cleans up the spooled file; a
//! persistence failure still returns the verdict, with a null record ID.

use axum::{
    Json,
    extract::{Multipart, State},
};
use bytes::Bytes;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

use crate::{
    AppState,
    api::models::{
        detections::{DetectData, DetectResponse},
        users::CurrentUser,
    },
    db::{
        handlers::{Detections, Repository},
        models::detections::{DetectionCreateDBRequest, StorageLocation},
    },
    errors::Error,
};

struct Upload {
    original_filename: String,
    bytes: Bytes,
}

/// Submit an image for deepfake detection
#[utoipa::path(
    post,
    path = "/api/detect",
    tag = "detect",
    request_body(content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Verdict on the submitted image", body = DetectResponse),
        (status = 400, description = "Missing or non-image upload"),
        (status = 401, description = "Not authenticated"),
        (status = 413, description = "Upload exceeds the size limit"),
        (status = 500, description = "Classifier failure"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn detect(
    State(state): State<AppState>,
    current_user: CurrentUser,
    multipart: Multipart,
) -> Result<Json<DetectResponse>, Error> {
    let upload = read_image_field(multipart, state.config.detector.max_upload_bytes).await?;
    let size_bytes = upload.bytes.len() as i64;

    // Spool to disk under a collision-free name; the classifier reads from a path
    let stored_filename = spooled_filename(&upload.original_filename);
    let uploads_dir = &state.config.detector.uploads_dir;
    let local_path = uploads_dir.join(&stored_filename);

    tokio::fs::write(&local_path, &upload.bytes).await.map_err(|e| Error::Internal {
        operation: format!("write upload to {}: {e}", local_path.display()),
    })?;

    let outcome = match state.detector.detect(&local_path).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Nothing to keep if there is no verdict
            remove_file_logged(&local_path).await;
            return Err(e);
        }
    };

    // Long-term home for the bytes: the bucket when configured, local disk otherwise
    let storage = match &state.storage {
        Some(storage) => match storage.put(upload.bytes.clone(), &upload.original_filename).await {
            Ok(stored) => {
                remove_file_logged(&local_path).await;
                StorageLocation::Remote {
                    key: stored.key,
                    url: stored.url,
                }
            }
            Err(e) => {
                warn!("Object storage upload failed, keeping local copy: {e}");
                StorageLocation::Local {
                    path: stored_filename.clone(),
                }
            }
        },
        None => StorageLocation::Local {
            path: stored_filename.clone(),
        },
    };

    let create_request = DetectionCreateDBRequest::builder()
        .original_filename(upload.original_filename.clone())
        .prediction(outcome.prediction.as_str().to_string())
        .confidence(outcome.confidence)
        .raw_score(outcome.raw_score)
        .storage(storage.clone())
        .size_bytes(size_bytes)
        .duration_ms(outcome.duration.as_millis() as i64)
        .model_id(outcome.model_id.clone())
        .build();

    // The verdict is already paid for; a persistence failure (acquiring the
    // connection included) downgrades the response to an unrecorded result instead
    // of discarding it
    let record_id = match state.db.acquire().await {
        Ok(mut pool_conn) => {
            let mut detections = Detections::new(&mut pool_conn);
            match detections.create(&create_request).await {
                Ok(record) => Some(record.id),
                Err(e) => {
                    warn!("Failed to persist detection record: {e}");
                    None
                }
            }
        }
        Err(e) => {
            warn!("Failed to persist detection record: {e}");
            None
        }
    };

    Ok(Json(DetectResponse {
        success: true,
        data: DetectData {
            id: record_id,
            original_name: upload.original_filename,
            prediction: outcome.prediction,
            confidence: outcome.confidence,
            raw_score: outcome.raw_score,
            is_fake: outcome.prediction.is_fake(),
            image_url: storage.public_url(),
            storage_type: storage.kind().to_string(),
            processing_time: outcome.duration.as_millis() as i64,
            model: outcome.model_id,
            message: outcome.prediction.message().to_string(),
        },
    }))
}

/// Pull the `image` field out of the multipart body, enforcing the size limit while
/// streaming.
async fn read_image_field(mut multipart: Multipart, max_bytes: u64) -> Result<Upload, Error> {
    while let Some(mut field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Invalid multipart request: {e}"),
    })? {
        if field.name() != Some("image") {
            continue;
        }

        let original_filename = field
            .file_name()
            .map(sanitize_filename)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "upload".to_string());

        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") {
                return Err(Error::BadRequest {
                    message: "Only image files are allowed".to_string(),
                });
            }
        }

        let mut buffer = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| Error::BadRequest {
            message: format!("Failed to read upload: {e}"),
        })? {
            if (buffer.len() + chunk.len()) as u64 > max_bytes {
                return Err(Error::PayloadTooLarge { limit: max_bytes });
            }
            buffer.extend_from_slice(&chunk);
        }

        if buffer.is_empty() {
            return Err(Error::BadRequest {
                message: "Uploaded image is empty".to_string(),
            });
        }

        return Ok(Upload {
            original_filename,
            bytes: Bytes::from(buffer),
        });
    }

    Err(Error::BadRequest {
        message: "No image file provided".to_string(),
    })
}

/// Strip any path components a client smuggled into the filename.
fn sanitize_filename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Unique on-disk name preserving the original extension.
fn spooled_filename(original: &str) -> String {
    match Path::new(original).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_lowercase()),
        None => Uuid::new_v4().to_string(),
    }
}

async fn remove_file_logged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {}: {e}", path.display());
    }
}
