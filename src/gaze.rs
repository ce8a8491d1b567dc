//! Eye gaze classification
//!
//! Face landmarks locate the eyes; the eye region of each frame is cropped,
//! resized and stacked into a sequence for the external classifier. When too
//! few crops survive, or no classifier is available, the result falls back to
//! a whole-frame motion estimate that is capped well below certainty and
//! never reports a detection at default settings.

use crate::classifier::{FeatureSequence, ModelRegistry};
use crate::config::{GazeConfig, MotionConfig};
use crate::error::DetectError;
use crate::estimator::LandmarkEstimator;
use crate::motion::movement_score;
use crate::types::{
    round_confidence, BehaviorDetails, BehaviorKind, DetectionResult, Frame, GazeDetails,
    LandmarkSet, ReasonCode, Region,
};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Classifier output order
pub const GAZE_CLASSES: [&str; 5] = ["down", "left", "right", "straight", "up"];

/// Crops needed before a classifier is consulted at all
pub const MIN_GAZE_SEQUENCE: usize = 2;

/// Eye contour points of the 468-point face mesh (both eyes)
pub const EYE_INDICES: [usize; 28] = [
    33, 246, 161, 160, 159, 158, 157, 173, 133, 7, 163, 144, 145, 153, 362, 398, 384, 385, 386,
    387, 388, 466, 263, 249, 390, 373, 374, 380,
];

/// Crop the eye region of a frame, resized to `crop_size` square
pub fn eye_crop(frame: &Frame, face: &LandmarkSet, config: &GazeConfig) -> Option<RgbImage> {
    let (width, height) = (frame.width(), frame.height());
    let points: Vec<(f64, f64)> = EYE_INDICES
        .iter()
        .filter_map(|&i| face.point(i))
        .map(|p| p.to_pixels(width, height))
        .collect();
    if points.is_empty() {
        return None;
    }

    let min_x = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    let x0 = (min_x - config.eye_margin_px).max(0.0);
    let y0 = (min_y - config.eye_margin_px).max(0.0);
    let x1 = (max_x + config.eye_margin_px).min(width as f64);
    let y1 = (max_y + config.eye_margin_px).min(height as f64);

    if x1 - x0 < config.min_crop_px || y1 - y0 < config.min_crop_px {
        debug!(frame = frame.index, w = x1 - x0, h = y1 - y0, "eye crop too small");
        return None;
    }

    let crop = imageops::crop_imm(
        &frame.image,
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    )
    .to_image();
    Some(imageops::resize(
        &crop,
        config.crop_size,
        config.crop_size,
        FilterType::Triangle,
    ))
}

/// Channel-first features in [0, 1]
fn crop_features(crop: &RgbImage) -> Vec<f32> {
    let (w, h) = crop.dimensions();
    let plane = (w * h) as usize;
    let mut features = vec![0.0f32; plane * 3];
    for (i, pixel) in crop.pixels().enumerate() {
        for c in 0..3 {
            features[c * plane + i] = pixel.0[c] as f32 / 255.0;
        }
    }
    features
}

/// Classify gaze direction for a frame batch
pub fn detect_eye_gaze(
    frames: &[Frame],
    estimator: &dyn LandmarkEstimator,
    models: &ModelRegistry,
    config: &GazeConfig,
    motion: &MotionConfig,
) -> Result<DetectionResult, DetectError> {
    // Stage 1: Assemble the crop sequence
    let frame_len = (config.crop_size * config.crop_size * 3) as usize;
    let mut sequence = FeatureSequence::new(frame_len);
    for frame in frames {
        let faces = match estimator.detect(frame, Region::Face) {
            Ok(faces) => faces,
            Err(e) => {
                warn!(frame = frame.index, error = %e, "face landmarks failed");
                continue;
            }
        };
        let Some(crop) = faces.first().and_then(|face| eye_crop(frame, face, config)) else {
            debug!(frame = frame.index, "no eye crop");
            continue;
        };
        sequence.push(&crop_features(&crop))?;
    }

    // Stage 2: Degenerate input never reaches the classifier
    if sequence.len() < MIN_GAZE_SEQUENCE {
        info!(behavior = "eye_gaze", crops = sequence.len(), frames = frames.len(), "too few eye crops");
        return Ok(motion_fallback(frames, sequence.len(), ReasonCode::MotionFallback, config, motion));
    }

    let classifier = match models.get(BehaviorKind::EyeGaze) {
        Ok(classifier) => classifier,
        Err(e) => {
            info!(behavior = "eye_gaze", error = %e, "classifier unavailable");
            return Ok(motion_fallback(frames, sequence.len(), ReasonCode::ModelUnavailable, config, motion));
        }
    };
    if sequence.len() < classifier.min_sequence_len() {
        return Ok(motion_fallback(frames, sequence.len(), ReasonCode::MotionFallback, config, motion));
    }

    // Stage 3: Classify
    let probabilities = match classifier.classify(&sequence) {
        Ok(p) if p.len() == GAZE_CLASSES.len() && p.iter().all(|v| v.is_finite()) => p,
        Ok(p) => {
            let err = DetectError::Classifier(format!(
                "expected {} finite class probabilities, got {}",
                GAZE_CLASSES.len(),
                p.len()
            ));
            warn!(behavior = "eye_gaze", error = %err, "classifier output rejected");
            return Ok(motion_fallback(frames, sequence.len(), ReasonCode::MotionFallback, config, motion)
                .with_error(err.kind()));
        }
        Err(e) => {
            warn!(behavior = "eye_gaze", error = %e, "classifier failed");
            return Ok(motion_fallback(frames, sequence.len(), ReasonCode::MotionFallback, config, motion)
                .with_error(e.kind()));
        }
    };

    let (best, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 0.0));
    let gaze = GAZE_CLASSES[best];

    info!(behavior = "eye_gaze", gaze, confidence, crops = sequence.len(), "gaze classified");

    let probabilities: BTreeMap<String, f64> = GAZE_CLASSES
        .iter()
        .zip(&probabilities)
        .map(|(label, p)| (label.to_string(), round_confidence(*p)))
        .collect();

    Ok(DetectionResult::new(true, confidence)
        .with_reason(ReasonCode::ClassifierPrediction)
        .with_details(BehaviorDetails::Gaze(GazeDetails {
            gaze: Some(gaze.to_string()),
            probabilities,
            eye_crops: sequence.len(),
            motion_score: None,
        })))
}

/// Motion-only estimate, capped below certainty
fn motion_fallback(
    frames: &[Frame],
    eye_crops: usize,
    reason: ReasonCode,
    config: &GazeConfig,
    motion: &MotionConfig,
) -> DetectionResult {
    let movement = movement_score(frames, motion);
    let confidence = (movement.score * config.fallback_gain + config.fallback_floor)
        .clamp(config.fallback_floor, config.fallback_ceiling);
    let detected = confidence > config.fallback_detect_threshold;

    DetectionResult::new(detected, confidence)
        .with_reason(reason)
        .as_fallback()
        .with_details(BehaviorDetails::Gaze(GazeDetails {
            gaze: None,
            probabilities: BTreeMap::new(),
            eye_crops,
            motion_score: Some(round_confidence(movement.score)),
        }))
}
