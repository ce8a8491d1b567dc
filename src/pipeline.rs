//! Behavior dispatch
//!
//! This module provides the public API for Kinesense. A behavior tag and its
//! loosely shaped payload go in, exactly one [`DetectionResult`] comes out.
//! Every failure below this boundary, including a panic inside a detector,
//! is flattened into a well-formed result with `error` set.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::classifier::{ModelRegistry, ModelStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::DetectorConfig;
use crate::decoder::decode_input;
use crate::error::DetectError;
use crate::estimator::{LandmarkEstimator, NoopEstimator};
use crate::fusion::{detect_foot_tapping, detect_hand_tapping};
use crate::gaze::detect_eye_gaze;
use crate::posture::{detect_sit_stand, MemoryPostureStore, PostureStore};
use crate::speech::detect_rapid_talking;
use crate::tracker::track_poses;
use crate::types::{BehaviorInput, BehaviorKind, DetectionResult, ReasonCode};

/// Keys a batch entry may carry its behavior tag under
const BATCH_TAG_KEYS: [&str; 3] = ["type", "behavior_type", "behaviorType"];

/// Keys a batch entry may carry its payload under
const BATCH_DATA_KEYS: [&str; 3] = ["data", "frame_sequence", "frame"];

/// Analyze one payload with default thresholds and no persisted state.
///
/// Convenient for one-off calls; `sit_stand` only ever reports a baseline
/// here since the posture record does not outlive the call. Use a
/// [`BehaviorAnalyzer`] with a persistent store for real sessions.
///
/// # Example
/// ```ignore
/// let result = analyze_behavior("rapid_talking", &json!([180, 190]));
/// assert!(result.detected);
/// ```
pub fn analyze_behavior(tag: &str, payload: &Value) -> DetectionResult {
    BehaviorAnalyzer::default().analyze(tag, payload)
}

/// Aggregate output of [`BehaviorAnalyzer::analyze_batch`]
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub success: bool,
    pub results: Vec<Value>,
    pub total_analyzed: usize,
}

impl BatchReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The behavior dispatcher with its collaborators.
///
/// Holds the thresholds, the landmark estimator, the classifier registry,
/// the posture store and the clock. All collaborators are shared handles so
/// one analyzer can serve concurrent calls.
pub struct BehaviorAnalyzer {
    config: DetectorConfig,
    estimator: Arc<dyn LandmarkEstimator>,
    models: Arc<ModelRegistry>,
    store: Arc<dyn PostureStore>,
    clock: Arc<dyn Clock>,
}

impl Default for BehaviorAnalyzer {
    fn default() -> Self {
        Self::new(DetectorConfig::default(), Arc::new(MemoryPostureStore::new()))
    }
}

impl BehaviorAnalyzer {
    /// Create an analyzer with no landmark estimator or classifiers attached
    pub fn new(config: DetectorConfig, store: Arc<dyn PostureStore>) -> Self {
        Self {
            config,
            estimator: Arc::new(NoopEstimator),
            models: Arc::new(ModelRegistry::new()),
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn LandmarkEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_models(mut self, models: Arc<ModelRegistry>) -> Self {
        self.models = models;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn PostureStore {
        self.store.as_ref()
    }

    /// Classifier availability per behavior
    pub fn model_status(&self) -> std::collections::BTreeMap<&'static str, ModelStatus> {
        self.models.statuses()
    }

    /// Analyze one tagged payload. Never fails and never panics outward.
    pub fn analyze(&self, tag: &str, payload: &Value) -> DetectionResult {
        let Some(kind) = BehaviorKind::parse(tag) else {
            warn!(tag, "unsupported behavior tag");
            return DetectionResult::failure("unsupported_behavior")
                .with_reason(ReasonCode::UnsupportedBehavior);
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            // Stage 1: Normalize the payload
            let input = decode_input(kind, payload)?;
            debug!(behavior = %kind, items = input.len(), "payload decoded");

            // Stage 2: Route to the detector
            self.analyze_input(kind, &input)
        }));

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(behavior = %kind, error = %e, "detector failed");
                flatten_error(&e)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(behavior = %kind, panic = %message, "detector panicked");
                DetectionResult::failure("internal_fault").with_reason(ReasonCode::InternalFault)
            }
        };

        info!(
            behavior = %kind,
            detected = result.detected,
            confidence = result.confidence,
            reason = ?result.reason,
            error = ?result.error,
            "analysis complete"
        );
        result
    }

    /// Parse a JSON payload string and analyze it
    pub fn analyze_json(&self, tag: &str, payload: &str) -> DetectionResult {
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => self.analyze(tag, &value),
            Err(e) => {
                warn!(tag, error = %e, "payload is not valid JSON");
                flatten_error(&DetectError::Json(e))
            }
        }
    }

    /// Route already-decoded input to its detector
    pub fn analyze_input(
        &self,
        kind: BehaviorKind,
        input: &BehaviorInput,
    ) -> Result<DetectionResult, DetectError> {
        let config = &self.config;
        match (kind, input) {
            (BehaviorKind::RapidTalking, BehaviorInput::Samples(samples)) => {
                detect_rapid_talking(samples, &config.speech)
            }
            (BehaviorKind::SitStand, BehaviorInput::PoseSequence(poses)) => detect_sit_stand(
                poses,
                self.store.as_ref(),
                self.clock.as_ref(),
                &config.posture,
            ),
            (BehaviorKind::SitStand, BehaviorInput::Frames(frames)) => {
                let poses = track_poses(frames, self.estimator.as_ref());
                detect_sit_stand(
                    &poses,
                    self.store.as_ref(),
                    self.clock.as_ref(),
                    &config.posture,
                )
            }
            (BehaviorKind::TappingHands, BehaviorInput::Frames(frames)) => {
                detect_hand_tapping(frames, self.estimator.as_ref(), &config.hands)
            }
            (BehaviorKind::TappingFeet, BehaviorInput::Frames(frames)) => {
                detect_foot_tapping(frames, self.estimator.as_ref(), &config.feet)
            }
            (BehaviorKind::EyeGaze, BehaviorInput::Frames(frames)) => detect_eye_gaze(
                frames,
                self.estimator.as_ref(),
                &self.models,
                &config.gaze,
                &config.motion,
            ),
            (kind, input) => Err(DetectError::InsufficientData(format!(
                "{kind} cannot be analyzed from {} input",
                input_shape(input)
            ))),
        }
    }

    /// Analyze a list of tagged entries.
    ///
    /// Each entry is `{type|behavior_type|behaviorType, data|frame_sequence|frame}`.
    /// Entries without a tag are skipped; every other entry yields one result
    /// annotated with `behavior_type` and a 0/1 `label`.
    pub fn analyze_batch(&self, batch: &Value) -> BatchReport {
        let entries: &[Value] = match batch {
            Value::Array(entries) => entries,
            Value::Object(map) => match map.get("behaviors").or_else(|| map.get("batch")) {
                Some(Value::Array(entries)) => entries,
                _ => std::slice::from_ref(batch),
            },
            _ => &[],
        };

        let mut results = Vec::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            let Some(tag) = BATCH_TAG_KEYS
                .iter()
                .find_map(|key| entry.get(*key).and_then(Value::as_str))
            else {
                debug!(position, "batch entry without a behavior tag skipped");
                continue;
            };
            let payload = BATCH_DATA_KEYS
                .iter()
                .find_map(|key| entry.get(*key))
                .unwrap_or(&Value::Null);

            let result = self.analyze(tag, payload);
            results.push(annotate(tag, &result));
        }

        info!(entries = entries.len(), analyzed = results.len(), "batch complete");
        BatchReport {
            success: true,
            total_analyzed: results.len(),
            results,
        }
    }
}

/// Flatten a detector error into a result; the kind becomes the `error` text
fn flatten_error(e: &DetectError) -> DetectionResult {
    let result = DetectionResult::failure(e.kind());
    let reason = match e {
        DetectError::InsufficientData(_) => Some(ReasonCode::InsufficientData),
        DetectError::UnsupportedBehavior(_) => Some(ReasonCode::UnsupportedBehavior),
        DetectError::ModelUnavailable(_) => Some(ReasonCode::ModelUnavailable),
        DetectError::StateStore(_) => Some(ReasonCode::StateStoreUnavailable),
        DetectError::Internal(_) => Some(ReasonCode::InternalFault),
        _ => None,
    };
    match reason {
        Some(reason) => result.with_reason(reason),
        None => result,
    }
}

/// Serialize a batch result with its tag and label attached
fn annotate(tag: &str, result: &DetectionResult) -> Value {
    let mut object = match serde_json::to_value(result) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert("detected".to_string(), Value::Bool(false));
            map.insert("confidence".to_string(), Value::from(0.0));
            map.insert("error".to_string(), Value::from("internal_fault"));
            map
        }
    };
    object.insert("behavior_type".to_string(), Value::from(tag));
    object.insert("label".to_string(), Value::from(result.label()));
    Value::Object(object)
}

fn input_shape(input: &BehaviorInput) -> &'static str {
    match input {
        BehaviorInput::Frames(_) => "frame",
        BehaviorInput::PoseSequence(_) => "pose-row",
        BehaviorInput::Samples(_) => "sample",
    }
}
