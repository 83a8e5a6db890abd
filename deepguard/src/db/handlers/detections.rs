//! Database repository for detection records.

use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::Result,
        handlers::repository::Repository,
        models::detections::{DetectionCreateDBRequest, DetectionDBResponse, StorageLocation},
    },
    types::{DetectionId, abbrev_uuid},
};

/// Filter for listing detections
#[derive(Debug, Clone, Default)]
pub struct DetectionFilter {
    /// Restrict to one verdict ("real" or "fake")
    pub prediction: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

/// Aggregates over the whole detection history.
#[derive(Debug, Clone, FromRow)]
pub struct DetectionStatsDB {
    pub total: i64,
    pub fake: i64,
    /// NULL when the table is empty
    pub avg_confidence: Option<f64>,
}

pub struct Detections<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Detections<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Count detections matching the filter's prediction (pagination fields ignored).
    #[instrument(skip(self), err)]
    pub async fn count(&mut self, filter: &DetectionFilter) -> Result<i64> {
        let count = if let Some(prediction) = &filter.prediction {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM detections WHERE prediction = $1")
                .bind(prediction)
                .fetch_one(&mut *self.db)
                .await?
        } else {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM detections")
                .fetch_one(&mut *self.db)
                .await?
        };

        Ok(count)
    }

    /// The `n` newest detections.
    #[instrument(skip(self), err)]
    pub async fn recent(&mut self, n: i64) -> Result<Vec<DetectionDBResponse>> {
        let rows = sqlx::query_as::<_, DetectionDBResponse>("SELECT * FROM detections ORDER BY created_at DESC LIMIT $1")
            .bind(n)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(rows)
    }

    /// Aggregate counts and average confidence across all detections.
    #[instrument(skip(self), err)]
    pub async fn stats(&mut self) -> Result<DetectionStatsDB> {
        let stats = sqlx::query_as::<_, DetectionStatsDB>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE prediction = 'fake') AS fake,
                   AVG(confidence) AS avg_confidence
            FROM detections
            "#,
        )
        .fetch_one(&mut *self.db)
        .await?;

        Ok(stats)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Detections<'c> {
    type CreateRequest = DetectionCreateDBRequest;
    type Response = DetectionDBResponse;
    type Id = DetectionId;
    type Filter = DetectionFilter;

    #[instrument(skip(self, request), fields(filename = %request.original_filename, prediction = %request.prediction), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let detection_id = Uuid::new_v4();

        let (local_path, remote_key, remote_url) = match &request.storage {
            StorageLocation::Local { path } => (Some(path.as_str()), None, None),
            StorageLocation::Remote { key, url } => (None, Some(key.as_str()), Some(url.as_str())),
        };

        let detection = sqlx::query_as::<_, DetectionDBResponse>(
            r#"
            INSERT INTO detections (
                id, original_filename, prediction, confidence, raw_score,
                storage_kind, local_path, remote_key, remote_url,
                size_bytes, duration_ms, model_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(detection_id)
        .bind(&request.original_filename)
        .bind(&request.prediction)
        .bind(request.confidence)
        .bind(request.raw_score)
        .bind(request.storage.kind())
        .bind(local_path)
        .bind(remote_key)
        .bind(remote_url)
        .bind(request.size_bytes)
        .bind(request.duration_ms)
        .bind(&request.model_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(detection)
    }

    #[instrument(skip(self), fields(detection_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let detection = sqlx::query_as::<_, DetectionDBResponse>("SELECT * FROM detections WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(detection)
    }

    #[instrument(skip(self), fields(skip = filter.skip, limit = filter.limit), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let detections = if let Some(prediction) = &filter.prediction {
            sqlx::query_as::<_, DetectionDBResponse>(
                "SELECT * FROM detections WHERE prediction = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(prediction)
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&mut *self.db)
            .await?
        } else {
            sqlx::query_as::<_, DetectionDBResponse>("SELECT * FROM detections ORDER BY created_at DESC LIMIT $1 OFFSET $2")
                .bind(filter.limit)
                .bind(filter.skip)
                .fetch_all(&mut *self.db)
                .await?
        };

        Ok(detections)
    }

    #[instrument(skip(self), fields(detection_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM detections WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    fn create_request(filename: &str, prediction: &str, confidence: f64) -> DetectionCreateDBRequest {
        DetectionCreateDBRequest::builder()
            .original_filename(filename.to_string())
            .prediction(prediction.to_string())
            .confidence(confidence)
            .raw_score(confidence / 100.0)
            .storage(StorageLocation::Local {
                path: format!("{filename}.stored"),
            })
            .size_bytes(1024)
            .duration_ms(150)
            .model_id("deepfake_detector".to_string())
            .build()
    }

    #[sqlx::test]
    async fn test_create_and_get_detection(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut detections = Detections::new(&mut conn);

        let created = detections.create(&create_request("a.jpg", "fake", 92.3)).await.unwrap();
        assert_eq!(created.prediction, "fake");
        assert_eq!(created.confidence, 92.3);
        assert_eq!(created.storage(), StorageLocation::Local {
            path: "a.jpg.stored".to_string()
        });

        let fetched = detections.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[sqlx::test]
    async fn test_remote_storage_round_trip(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut detections = Detections::new(&mut conn);

        let mut request = create_request("b.png", "real", 60.0);
        request.storage = StorageLocation::Remote {
            key: "uploads/1-b.png".to_string(),
            url: "https://images.example.com/uploads/1-b.png".to_string(),
        };

        let created = detections.create(&request).await.unwrap();
        assert_eq!(created.storage_kind, "remote");
        assert_eq!(created.storage(), request.storage);
    }

    #[sqlx::test]
    async fn test_list_with_prediction_filter_and_pagination(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut detections = Detections::new(&mut conn);

        for i in 0..5 {
            detections.create(&create_request(&format!("f{i}.jpg"), "fake", 90.0)).await.unwrap();
        }
        for i in 0..3 {
            detections.create(&create_request(&format!("r{i}.jpg"), "real", 70.0)).await.unwrap();
        }

        let all = detections
            .list(&DetectionFilter {
                prediction: None,
                skip: 0,
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 8);

        let fakes = detections
            .list(&DetectionFilter {
                prediction: Some("fake".to_string()),
                skip: 0,
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(fakes.len(), 5);
        assert!(fakes.iter().all(|d| d.prediction == "fake"));

        // Second page of two
        let page = detections
            .list(&DetectionFilter {
                prediction: None,
                skip: 2,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let fake_count = detections
            .count(&DetectionFilter {
                prediction: Some("fake".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fake_count, 5);
    }

    #[sqlx::test]
    async fn test_stats_and_recent(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut detections = Detections::new(&mut conn);

        // Empty table: no average
        let empty = detections.stats().await.unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.fake, 0);
        assert!(empty.avg_confidence.is_none());

        detections.create(&create_request("a.jpg", "fake", 90.0)).await.unwrap();
        detections.create(&create_request("b.jpg", "real", 70.0)).await.unwrap();
        detections.create(&create_request("c.jpg", "real", 80.0)).await.unwrap();

        let stats = detections.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.fake, 1);
        assert_eq!(stats.avg_confidence, Some(80.0));

        let recent = detections.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[sqlx::test]
    async fn test_delete_twice(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut detections = Detections::new(&mut conn);

        let created = detections.create(&create_request("gone.jpg", "fake", 99.0)).await.unwrap();

        assert!(detections.delete(created.id).await.unwrap());
        assert!(!detections.delete(created.id).await.unwrap());
        assert!(detections.get_by_id(created.id).await.unwrap().is_none());
    }
}
