//! External deepfake classifier invocation.
//!
//! The classifier is a separate process (a Python script wrapping the model) invoked
//! per image. It prints a single-line JSON verdict on stdout; diagnostic chatter from
//! the ML stack may precede it, so parsing scans stdout for the last parseable line.

use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::{
    api::models::detections::Prediction,
    config::DetectorConfig,
    errors::{Error, Result},
};

/// The classifier's verdict on one image.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub prediction: Prediction,
    /// Confidence in the prediction, 0-100
    pub confidence: f64,
    /// Raw model output before thresholding
    pub raw_score: f64,
    /// Wall-clock inference time
    pub duration: Duration,
    /// Identifier of the model that produced the verdict
    pub model_id: String,
}

/// Anything that can classify an image on disk. The production implementation shells
/// out to a script; tests substitute a stub.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image_path: &Path) -> Result<DetectionOutcome>;
}

/// Runs the classifier script as a subprocess.
pub struct ScriptDetector {
    interpreter: String,
    script: PathBuf,
    model: PathBuf,
}

impl ScriptDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            script: config.script.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl Detector for ScriptDetector {
    #[instrument(skip(self), fields(script = %self.script.display()), err)]
    async fn detect(&self, image_path: &Path) -> Result<DetectionOutcome> {
        let started = Instant::now();

        let output = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg("--image")
            .arg(image_path)
            .arg("--model")
            .arg(&self.model)
            .output()
            .await
            .map_err(|e| Error::ModelFailure {
                message: format!("failed to spawn classifier process: {e}"),
            })?;

        let duration = started.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(exit = ?output.status.code(), elapsed_ms = duration.as_millis() as u64, "classifier finished");

        let verdict = match parse_verdict(&stdout) {
            Some(verdict) => verdict,
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::ModelFailure {
                    message: format!(
                        "classifier produced no verdict (exit {:?}): {}",
                        output.status.code(),
                        stderr.trim().chars().take(500).collect::<String>()
                    ),
                });
            }
        };

        verdict.into_outcome(duration)
    }
}

/// The JSON verdict line printed by the classifier script.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    success: bool,
    #[serde(default)]
    prediction: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    raw_score: Option<f64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RawVerdict {
    fn into_outcome(self, duration: Duration) -> Result<DetectionOutcome> {
        if !self.success {
            return Err(Error::ModelFailure {
                message: self.error.unwrap_or_else(|| "classifier reported failure".to_string()),
            });
        }

        let prediction = match self.prediction.as_deref() {
            Some("fake") => Prediction::Fake,
            Some("real") => Prediction::Real,
            other => {
                return Err(Error::ModelFailure {
                    message: format!("classifier returned unknown prediction: {other:?}"),
                });
            }
        };

        let confidence = self.confidence.ok_or_else(|| Error::ModelFailure {
            message: "classifier verdict is missing confidence".to_string(),
        })?;
        if !(0.0..=100.0).contains(&confidence) {
            return Err(Error::ModelFailure {
                message: format!("classifier confidence out of range: {confidence}"),
            });
        }

        Ok(DetectionOutcome {
            prediction,
            confidence,
            raw_score: self.raw_score.unwrap_or(0.0),
            duration,
            model_id: self.model.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Find the verdict in classifier stdout.
///
/// Torch and friends write warnings to stdout, so the verdict is the LAST line that
/// parses as a JSON object with a `success` field.
fn parse_verdict(stdout: &str) -> Option<RawVerdict> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<RawVerdict>(line).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_verdict() {
        let stdout = r#"{"success": true, "prediction": "fake", "confidence": 92.3, "raw_score": 0.923, "is_fake": true, "model": "deepfake_detector_v2"}"#;

        let verdict = parse_verdict(stdout).unwrap();
        let outcome = verdict.into_outcome(Duration::from_millis(150)).unwrap();

        assert_eq!(outcome.prediction, Prediction::Fake);
        assert_eq!(outcome.confidence, 92.3);
        assert_eq!(outcome.raw_score, 0.923);
        assert_eq!(outcome.model_id, "deepfake_detector_v2");
    }

    #[test]
    fn test_parse_verdict_with_leading_noise() {
        let stdout = "UserWarning: CUDA not available, falling back to CPU\nLoading model weights...\n{\"success\": true, \"prediction\": \"real\", \"confidence\": 71.0, \"raw_score\": 0.29, \"model\": \"deepfake_detector\"}\n";

        let verdict = parse_verdict(stdout).unwrap();
        let outcome = verdict.into_outcome(Duration::from_millis(10)).unwrap();

        assert_eq!(outcome.prediction, Prediction::Real);
        assert_eq!(outcome.confidence, 71.0);
    }

    #[test]
    fn test_parse_no_verdict() {
        assert!(parse_verdict("Traceback (most recent call last):\n  ValueError: bad image\n").is_none());
        assert!(parse_verdict("").is_none());
    }

    #[test]
    fn test_failure_verdict() {
        let stdout = r#"{"success": false, "error": "Unable to decode image"}"#;

        let verdict = parse_verdict(stdout).unwrap();
        let result = verdict.into_outcome(Duration::from_millis(5));

        match result {
            Err(Error::ModelFailure { message }) => assert!(message.contains("Unable to decode image")),
            other => panic!("expected ModelFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_prediction_rejected() {
        let stdout = r#"{"success": true, "prediction": "maybe", "confidence": 50.0}"#;

        let verdict = parse_verdict(stdout).unwrap();
        assert!(verdict.into_outcome(Duration::ZERO).is_err());
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let stdout = r#"{"success": true, "prediction": "fake", "confidence": 150.0}"#;

        let verdict = parse_verdict(stdout).unwrap();
        assert!(verdict.into_outcome(Duration::ZERO).is_err());
    }
}
