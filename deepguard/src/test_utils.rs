//! Shared helpers for integration-style tests. Everything here may panic freely.

use async_trait::async_trait;
use axum_test::TestServer;
use serde_json::{Value, json};
use sqlx::PgPool;
use std::{path::Path, sync::Arc, time::Duration};
use uuid::Uuid;

use crate::{
    AppState, build_router,
    api::models::detections::Prediction,
    config::{Config, EmailTransportConfig, Environment},
    db::{
        handlers::{Detections, Repository},
        models::detections::{DetectionCreateDBRequest, DetectionDBResponse, StorageLocation},
    },
    detector::{DetectionOutcome, Detector},
    email::EmailService,
    errors::{Error, Result},
};

/// Config suitable for tests: file email transport and a fresh uploads directory,
/// both under a unique temp path so parallel tests never collide.
pub fn create_test_config() -> Config {
    let scratch = tempfile::Builder::new()
        .prefix("deepguard-test-")
        .tempdir()
        .unwrap()
        .keep();
    let uploads_dir = scratch.join("uploads");
    let emails_dir = scratch.join("emails");
    std::fs::create_dir_all(&uploads_dir).unwrap();
    std::fs::create_dir_all(&emails_dir).unwrap();

    let mut config = Config {
        secret_key: Some("test-secret-key-that-is-long-enough".to_string()),
        environment: Environment::Development,
        ..Config::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: emails_dir.to_string_lossy().into_owned(),
    };
    config.detector.uploads_dir = uploads_dir;
    config
}

/// Classifier stub returning a fixed outcome.
pub struct StubDetector {
    outcome: DetectionOutcome,
}

impl StubDetector {
    pub fn new(outcome: DetectionOutcome) -> Self {
        Self { outcome }
    }
}

#[async_trait]
impl Detector for StubDetector {
    async fn detect(&self, _image_path: &Path) -> Result<DetectionOutcome> {
        Ok(self.outcome.clone())
    }
}

/// Classifier stub that always fails.
pub struct FailingDetector;

#[async_trait]
impl Detector for FailingDetector {
    async fn detect(&self, _image_path: &Path) -> Result<DetectionOutcome> {
        Err(Error::ModelFailure {
            message: "stub classifier failure".to_string(),
        })
    }
}

fn default_stub_outcome() -> DetectionOutcome {
    DetectionOutcome {
        prediction: Prediction::Real,
        confidence: 50.0,
        raw_score: 0.5,
        duration: Duration::from_millis(1),
        model_id: "stub".to_string(),
    }
}

pub fn create_test_state(pool: PgPool) -> AppState {
    create_test_state_with_detector(pool, StubDetector::new(default_stub_outcome()))
}

pub fn create_test_state_with_detector(pool: PgPool, detector: impl Detector + 'static) -> AppState {
    let config = create_test_config();
    let mailer = Arc::new(EmailService::new(&config).unwrap());
    let detector: Arc<dyn Detector> = Arc::new(detector);

    AppState::builder().db(pool).config(config).mailer(mailer).detector(detector).build()
}

pub fn spawn_test_server(pool: PgPool) -> TestServer {
    let state = create_test_state(pool);
    TestServer::new(build_router(state).unwrap()).unwrap()
}

/// Test server with a caller-supplied classifier, returning the state so tests can
/// inspect the uploads directory.
pub fn spawn_test_server_with_detector(pool: PgPool, detector: impl Detector + 'static) -> (TestServer, AppState) {
    let state = create_test_state_with_detector(pool, detector);
    let server = TestServer::new(build_router(state.clone()).unwrap()).unwrap();
    (server, state)
}

/// Sign up a fresh user and return their session token.
pub async fn authenticated_token(server: &TestServer) -> String {
    let email = format!("user-{}@example.com", Uuid::new_v4());
    let response = server
        .post("/api/auth/signup")
        .json(&json!({
            "name": "Test User",
            "email": email,
            "password": "hunter22",
            "confirmPassword": "hunter22",
        }))
        .await;

    response.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = response.json();
    body["token"].as_str().unwrap().to_string()
}

/// Insert a detection record directly, bypassing the classifier.
pub async fn insert_detection(pool: &PgPool, filename: &str, prediction: &str, confidence: f64) -> DetectionDBResponse {
    let request = DetectionCreateDBRequest::builder()
        .original_filename(filename.to_string())
        .prediction(prediction.to_string())
        .confidence(confidence)
        .raw_score(confidence / 100.0)
        .storage(StorageLocation::Local {
            path: format!("{filename}.stored"),
        })
        .size_bytes(2048)
        .duration_ms(120)
        .model_id("deepfake_detector".to_string())
        .build();

    let mut conn = pool.acquire().await.unwrap();
    let mut detections = Detections::new(&mut conn);
    detections.create(&request).await.unwrap()
}
