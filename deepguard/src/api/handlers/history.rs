//! Detection history: listing, stats, and deletion.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::warn;

use crate::{
    AppState,
    api::models::{
        auth::MessageResponse,
        detections::{
            DetectionItemResponse, DetectionResponse, HistoryQuery, HistoryResponse, StatsData, StatsResponse, round1,
        },
        pagination::PaginationMeta,
        users::CurrentUser,
    },
    db::{
        handlers::{DetectionFilter, Detections, Repository},
        models::detections::StorageLocation,
    },
    errors::Error,
    types::DetectionId,
};

/// Number of detections included in the stats response.
const RECENT_COUNT: i64 = 5;

/// List past detections, newest first
#[utoipa::path(
    get,
    path = "/api/history",
    tag = "history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Paginated detection history", body = HistoryResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn list_history(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, Error> {
    let filter = DetectionFilter {
        prediction: query.verdict.map(|v| v.as_str().to_string()),
        skip: query.skip(),
        limit: query.limit(),
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut detections = Detections::new(&mut pool_conn);

    let items = detections.list(&filter).await?;
    let total = detections.count(&filter).await?;

    Ok(Json(HistoryResponse {
        success: true,
        data: items.into_iter().map(DetectionResponse::from).collect(),
        pagination: PaginationMeta::new(query.page(), query.limit(), total),
    }))
}

/// Aggregate statistics over the detection history
#[utoipa::path(
    get,
    path = "/api/history/stats",
    tag = "history",
    responses(
        (status = 200, description = "History statistics", body = StatsResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn get_stats(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<StatsResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut detections = Detections::new(&mut pool_conn);

    let stats = detections.stats().await?;
    let recent = detections.recent(RECENT_COUNT).await?;

    let fake_percentage = if stats.total > 0 {
        round1(stats.fake as f64 / stats.total as f64 * 100.0)
    } else {
        0.0
    };

    Ok(Json(StatsResponse {
        success: true,
        data: StatsData {
            total: stats.total,
            fake: stats.fake,
            real: stats.total - stats.fake,
            fake_percentage,
            avg_confidence: round1(stats.avg_confidence.unwrap_or(0.0)),
            recent_detections: recent.into_iter().map(DetectionResponse::from).collect(),
        },
    }))
}

/// Fetch a single detection record
#[utoipa::path(
    get,
    path = "/api/history/{id}",
    tag = "history",
    params(("id" = String, Path, description = "Detection record ID")),
    responses(
        (status = 200, description = "Detection record", body = DetectionItemResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such detection"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn get_detection(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<DetectionItemResponse>, Error> {
    let id = parse_detection_id(&id)?;
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut detections = Detections::new(&mut pool_conn);

    let detection = detections.get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Detection".to_string(),
        id: id.to_string(),
    })?;

    Ok(Json(DetectionItemResponse {
        success: true,
        data: DetectionResponse::from(detection),
    }))
}

/// Delete a detection record and reclaim its stored image
#[utoipa::path(
    delete,
    path = "/api/history/{id}",
    tag = "history",
    params(("id" = String, Path, description = "Detection record ID")),
    responses(
        (status = 200, description = "Detection deleted", body = MessageResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such detection"),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.id))]
pub async fn delete_detection(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, Error> {
    let id = parse_detection_id(&id)?;
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut detections = Detections::new(&mut pool_conn);

    let detection = detections.get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Detection".to_string(),
        id: id.to_string(),
    })?;

    // Reclaim the stored image first; a failure only leaks bytes and never blocks
    // the record delete.
    match detection.storage() {
        StorageLocation::Local { path } => {
            let full_path = state.config.detector.uploads_dir.join(&path);
            if let Err(e) = tokio::fs::remove_file(&full_path).await {
                warn!("Failed to remove {}: {e}", full_path.display());
            }
        }
        StorageLocation::Remote { key, .. } => {
            if let Some(storage) = &state.storage {
                storage.delete(&key).await;
            } else {
                warn!("Detection {id} referenced remote object {key} but no object storage is configured");
            }
        }
    }

    if !detections.delete(id).await? {
        return Err(Error::NotFound {
            resource: "Detection".to_string(),
            id: id.to_string(),
        });
    }

    Ok(Json(MessageResponse {
        success: true,
        message: "Detection deleted successfully".to_string(),
    }))
}

/// A malformed ID can't name any record, so it reads as not-found rather than a
/// request-shape error.
fn parse_detection_id(raw: &str) -> Result<DetectionId, Error> {
    raw.parse().map_err(|_| Error::NotFound {
        resource: "Detection".to_string(),
        id: raw.to_string(),
    })
}
