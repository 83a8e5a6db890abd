//! API models for detection submissions, history, and stats.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::models::pagination::{DEFAULT_LIMIT, MAX_LIMIT, PaginationMeta},
    db::models::detections::DetectionDBResponse,
    types::DetectionId,
};

/// The classifier's verdict on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Prediction {
    Real,
    Fake,
}

impl Prediction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prediction::Real => "real",
            Prediction::Fake => "fake",
        }
    }

    pub fn is_fake(&self) -> bool {
        matches!(self, Prediction::Fake)
    }

    /// Human-readable verdict line shown to the uploader.
    pub fn message(&self) -> &'static str {
        match self {
            Prediction::Fake => "⚠️ This image appears to be a DEEPFAKE!",
            Prediction::Real => "✅ This image appears to be AUTHENTIC",
        }
    }

    /// Lenient mapping from a stored prediction string. The check constraint only
    /// admits "real" and "fake".
    pub fn from_db(value: &str) -> Self {
        match value {
            "fake" => Prediction::Fake,
            _ => Prediction::Real,
        }
    }
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query parameters for the history listing.
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Page number, 1-based (default: 1)
    #[param(default = 1, minimum = 1)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub page: Option<i64>,

    /// Items per page (default: 20, max: 100)
    #[param(default = 20, minimum = 1, maximum = 100)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,

    /// Restrict to one verdict ("real" or "fake")
    #[serde(rename = "type")]
    pub verdict: Option<Prediction>,
}

impl HistoryQuery {
    /// Get the page number, 1-based, defaulting to the first page.
    #[inline]
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Get the limit value, clamped between 1 and MAX_LIMIT.
    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Row offset implied by page and limit.
    #[inline]
    pub fn skip(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}

/// A stored detection as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResponse {
    #[schema(value_type = Uuid)]
    pub id: DetectionId,
    pub original_name: String,
    pub prediction: Prediction,
    pub confidence: f64,
    pub raw_score: f64,
    pub is_fake: bool,
    pub image_url: String,
    pub storage_type: String,
    pub size_bytes: i64,
    pub processing_time: i64,
    pub model: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<DetectionDBResponse> for DetectionResponse {
    fn from(detection: DetectionDBResponse) -> Self {
        let storage = detection.storage();
        let prediction = Prediction::from_db(&detection.prediction);

        Self {
            id: detection.id,
            original_name: detection.original_filename,
            prediction,
            confidence: detection.confidence,
            raw_score: detection.raw_score,
            is_fake: prediction.is_fake(),
            image_url: storage.public_url(),
            storage_type: storage.kind().to_string(),
            size_bytes: detection.size_bytes,
            processing_time: detection.duration_ms,
            model: detection.model_id,
            created_at: detection.created_at,
        }
    }
}

/// Payload for a completed detection submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectData {
    /// Stored record ID; null if persistence failed after a successful verdict
    #[schema(value_type = Option<Uuid>)]
    pub id: Option<DetectionId>,
    pub original_name: String,
    pub prediction: Prediction,
    pub confidence: f64,
    pub raw_score: f64,
    pub is_fake: bool,
    pub image_url: String,
    pub storage_type: String,
    pub processing_time: i64,
    pub model: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DetectResponse {
    pub success: bool,
    pub data: DetectData,
}

/// Paginated history listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub success: bool,
    pub data: Vec<DetectionResponse>,
    pub pagination: PaginationMeta,
}

/// Single stored detection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DetectionItemResponse {
    pub success: bool,
    pub data: DetectionResponse,
}

/// Aggregate statistics over the detection history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsData {
    pub total: i64,
    pub fake: i64,
    pub real: i64,
    /// Share of fake verdicts, percent, one decimal place
    pub fake_percentage: f64,
    /// Mean confidence across all records, one decimal place
    pub avg_confidence: f64,
    /// The five newest detections
    pub recent_detections: Vec<DetectionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub success: bool,
    pub data: StatsData,
}

/// Round to one decimal place for presentation.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_query_defaults_and_clamping() {
        let q = HistoryQuery::default();
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), DEFAULT_LIMIT);
        assert_eq!(q.skip(), 0);

        let q = HistoryQuery {
            page: Some(0),
            limit: Some(-5),
            verdict: None,
        };
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), 1);

        let q = HistoryQuery {
            page: Some(3),
            limit: Some(1000),
            verdict: None,
        };
        assert_eq!(q.limit(), MAX_LIMIT);
        assert_eq!(q.skip(), 2 * MAX_LIMIT);
    }

    #[test]
    fn test_history_query_from_query_string() {
        let q: HistoryQuery = serde_urlencoded::from_str("page=2&limit=10&type=fake").unwrap();
        assert_eq!(q.page(), 2);
        assert_eq!(q.limit(), 10);
        assert_eq!(q.verdict, Some(Prediction::Fake));
        assert_eq!(q.skip(), 10);
    }

    #[test]
    fn test_prediction_messages() {
        assert_eq!(Prediction::Fake.message(), "⚠️ This image appears to be a DEEPFAKE!");
        assert_eq!(Prediction::Real.message(), "✅ This image appears to be AUTHENTIC");
        assert!(Prediction::Fake.is_fake());
        assert!(!Prediction::Real.is_fake());
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(33.333), 33.3);
        assert_eq!(round1(66.666), 66.7);
        assert_eq!(round1(0.0), 0.0);
    }
}
