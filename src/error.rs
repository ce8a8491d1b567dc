//! Error types for Kinesense

use thiserror::Error;

/// Errors that can end a detector before it produces a verdict.
///
/// Soft outcomes (visibility gates, fusion rejection, posture guards) are not
/// errors; they are reported as regular results with a reason code. This type
/// covers the faults the dispatcher flattens into the `error` field.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Unsupported behavior: {0}")]
    UnsupportedBehavior(String),

    #[error("Landmark estimator failed: {0}")]
    Estimator(String),

    #[error("Classifier failed: {0}")]
    Classifier(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Posture state store error: {0}")]
    StateStore(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal fault: {0}")]
    Internal(String),
}

impl DetectError {
    /// Stable snake_case code surfaced in the `error` field of a result
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::InsufficientData(_) => "insufficient_data",
            DetectError::UnsupportedBehavior(_) => "unsupported_behavior",
            DetectError::Estimator(_) => "estimator_failed",
            DetectError::Classifier(_) => "classifier_failed",
            DetectError::ModelUnavailable(_) => "model_unavailable",
            DetectError::StateStore(_) => "state_store",
            DetectError::Config(_) => "config",
            DetectError::Io(_) => "io",
            DetectError::Json(_) => "invalid_json",
            DetectError::Internal(_) => "internal_fault",
        }
    }
}

/// Errors raised by a posture state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State file IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not acquire state lock: {0}")]
    Lock(String),
}
