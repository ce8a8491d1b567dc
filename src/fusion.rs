//! Pattern fusion for repetitive-motion behaviors
//!
//! Each evidence stream (frame motion, landmark trajectory, inter-hand
//! distance) is scored on its own and decides whether it alone would call the
//! behavior. The final verdict requires several streams to agree, the fused
//! confidence to clear a floor and enough tap evidence. One noisy stream is
//! never enough.

use crate::config::{FootTapConfig, HandTapConfig};
use crate::error::DetectError;
use crate::estimator::LandmarkEstimator;
use crate::motion::{tap_motion, TapMotion, TapMotionParams};
use crate::tracker::{track_feet, track_hands};
use crate::types::{
    round_confidence, BehaviorDetails, DetectionResult, FootDetails, Frame, HandDetails,
    HandPattern, ReasonCode, Signal, Trajectory,
};
use tracing::info;

/// Streams scores are capped at; no single stream reaches certainty
const STREAM_SCORE_CAP: f64 = 0.6;

pub const MOTION_STREAM: &str = "motion";
pub const LANDMARK_STREAM: &str = "landmark";
pub const CLAP_STREAM: &str = "clap";

/// Agreement requirements for a positive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionRule {
    pub min_methods: usize,
    pub min_confidence: f64,
    pub min_taps: u32,
}

/// Outcome of combining stream verdicts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionOutcome {
    pub detected: bool,
    /// Best score among the streams that fired
    pub confidence: f64,
    pub methods_agreeing: usize,
    /// Best evidence count among the streams that fired
    pub tap_count: u32,
}

/// Combine independent stream verdicts under the agreement rule
pub fn fuse(signals: &[Signal], rule: &FusionRule) -> FusionOutcome {
    let fired: Vec<&Signal> = signals.iter().filter(|s| s.fired).collect();
    let methods_agreeing = fired.len();
    let confidence = fired.iter().map(|s| s.score).fold(0.0, f64::max);
    let tap_count = fired.iter().map(|s| s.evidence).max().unwrap_or(0);

    let detected = methods_agreeing >= rule.min_methods.max(1)
        && confidence > rule.min_confidence
        && tap_count >= rule.min_taps;

    FusionOutcome {
        detected,
        confidence,
        methods_agreeing,
        tap_count,
    }
}

/// Parameters of a motion stream's verdict
struct MotionRule {
    min_taps: u32,
    min_movement: f64,
    movement_gain: f64,
    tap_gain: f64,
}

fn motion_signal(motion: &TapMotion, rule: &MotionRule) -> Signal {
    if motion.pairs.is_empty() {
        return Signal::silent(MOTION_STREAM);
    }
    let fired = motion.taps >= rule.min_taps && motion.mean_movement > rule.min_movement;
    let score = (motion.mean_movement * rule.movement_gain + motion.taps as f64 * rule.tap_gain)
        .clamp(0.3, STREAM_SCORE_CAP);
    Signal::new(MOTION_STREAM, if fired { score } else { 0.0 }, motion.taps, fired)
}

/// Parameters of a landmark stream's verdict
struct LandmarkRule {
    min_positions: usize,
    step_px: f64,
    min_taps: u32,
    min_avg_px: f64,
    avg_gain: f64,
    tap_gain: f64,
}

/// Best verdict among the tracked trajectories
fn landmark_signal(trajectories: &[Trajectory], rule: &LandmarkRule) -> Signal {
    trajectories
        .iter()
        .filter(|t| t.observed_count() >= rule.min_positions.max(2))
        .map(|t| {
            let steps = t.steps();
            let avg = steps.iter().sum::<f64>() / steps.len().max(1) as f64;
            let taps = steps.iter().filter(|&&s| s > rule.step_px).count() as u32;
            let fired = avg > rule.min_avg_px && taps >= rule.min_taps;
            let score = (avg * rule.avg_gain + taps as f64 * rule.tap_gain).min(STREAM_SCORE_CAP);
            Signal::new(LANDMARK_STREAM, if fired { score } else { 0.0 }, taps, fired)
        })
        .max_by(|a, b| {
            (a.fired, a.score, a.evidence)
                .partial_cmp(&(b.fired, b.score, b.evidence))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_else(|| Signal::silent(LANDMARK_STREAM))
}

/// Clap verdict from inter-hand distances
///
/// The evidence count is the number of claps: frames with the hands close
/// together, three frames to a clap, at least one.
fn clap_signal(distances: &[f64], config: &HandTapConfig) -> Signal {
    if distances.len() < 2 {
        return Signal::silent(CLAP_STREAM);
    }
    let min = distances.iter().copied().fold(f64::INFINITY, f64::min);
    let max = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    let fired = range > config.clap_min_range_px && min < config.clap_max_min_distance_px;
    if !fired {
        return Signal::new(CLAP_STREAM, 0.0, 0, false);
    }
    let close = distances.iter().filter(|&&d| d < config.clap_close_px).count() as u32;
    let claps = (close / 3).max(1);
    let score = (range * 0.02 + claps as f64 * 0.3).min(STREAM_SCORE_CAP);
    Signal::new(CLAP_STREAM, score, claps, true)
}

// ============================================================================
// Hands
// ============================================================================

/// Detect hand tapping or clapping in a frame batch
pub fn detect_hand_tapping(
    frames: &[Frame],
    estimator: &dyn LandmarkEstimator,
    config: &HandTapConfig,
) -> Result<DetectionResult, DetectError> {
    // Stage 1: Track hands; nothing else runs without them
    let tracks = track_hands(frames, estimator, config);
    if !tracks.any_hands() {
        info!(behavior = "tapping_hands", frames = frames.len(), "no hands detected");
        return Ok(
            DetectionResult::rejected(ReasonCode::NoHandsDetected).with_details(
                BehaviorDetails::Hands(HandDetails {
                    pattern: HandPattern::None,
                    tap_count: 0,
                    clap_count: 0,
                    tapping_score: 0.0,
                    clapping_score: 0.0,
                    methods_agreeing: 0,
                    frames_analyzed: frames.len(),
                    hand_frames: 0,
                    signals: Vec::new(),
                }),
            ),
        );
    }

    // Stage 2: Score each evidence stream independently
    let motion = tap_motion(
        frames,
        &TapMotionParams {
            pixel_threshold: config.motion_pixel_threshold,
            tap_change_ratio: config.motion_tap_change_ratio,
            tap_intensity: config.motion_tap_intensity,
            bottom_fraction: None,
        },
    );
    let motion = motion_signal(
        &motion,
        &MotionRule {
            min_taps: config.motion_min_taps,
            min_movement: config.motion_min_movement,
            movement_gain: 20.0,
            tap_gain: 0.1,
        },
    );
    let landmark = landmark_signal(
        &tracks.slots,
        &LandmarkRule {
            min_positions: 2,
            step_px: config.landmark_step_px,
            min_taps: config.landmark_min_taps,
            min_avg_px: config.landmark_min_avg_px,
            avg_gain: 0.05,
            tap_gain: 0.15,
        },
    );
    let clap = clap_signal(&tracks.inter_hand_px, config);

    // Stage 3: Fuse under the agreement rule
    let signals = vec![motion, landmark, clap.clone()];
    let outcome = fuse(
        &signals,
        &FusionRule {
            min_methods: config.min_methods,
            min_confidence: config.min_confidence,
            min_taps: config.min_taps,
        },
    );

    let tapping_score = signals
        .iter()
        .filter(|s| s.fired && s.name != CLAP_STREAM)
        .map(|s| s.score)
        .fold(0.0, f64::max);
    let tap_count = signals
        .iter()
        .filter(|s| s.fired && s.name != CLAP_STREAM)
        .map(|s| s.evidence)
        .max()
        .unwrap_or(0);
    let (clap_fired, clap_count, clapping_score) = (clap.fired, clap.evidence, clap.score);
    let pattern = match outcome.detected {
        false => HandPattern::None,
        true if clap_fired && clapping_score >= tapping_score => HandPattern::Clapping,
        true => HandPattern::Tapping,
    };

    info!(
        behavior = "tapping_hands",
        detected = outcome.detected,
        confidence = outcome.confidence,
        methods = outcome.methods_agreeing,
        taps = outcome.tap_count,
        ?pattern,
        "hand fusion complete"
    );

    let details = BehaviorDetails::Hands(HandDetails {
        pattern,
        tap_count,
        clap_count,
        tapping_score: round_confidence(tapping_score),
        clapping_score,
        methods_agreeing: outcome.methods_agreeing,
        frames_analyzed: tracks.frames_analyzed,
        hand_frames: tracks.hand_frames,
        signals,
    });

    Ok(verdict(outcome).with_details(details))
}

// ============================================================================
// Feet
// ============================================================================

/// Detect foot tapping in a frame batch
///
/// Nothing is scored unless the full-body gate passes; a partial body never
/// yields a verdict.
pub fn detect_foot_tapping(
    frames: &[Frame],
    estimator: &dyn LandmarkEstimator,
    config: &FootTapConfig,
) -> Result<DetectionResult, DetectError> {
    // Stage 1: Track ankles and check the full-body gate
    let tracks = track_feet(frames, estimator, config);
    let mut details = FootDetails {
        tap_count: 0,
        methods_agreeing: 0,
        frames_analyzed: tracks.frames_analyzed,
        ankle_detections: tracks.ankle_detections,
        full_body_frames: tracks.full_body_frames,
        body_span: tracks.body_span().map(round_confidence),
        signals: Vec::new(),
    };

    if let Err(reason) = tracks.gate(config) {
        info!(behavior = "tapping_feet", ?reason, "full-body gate failed");
        return Ok(DetectionResult::rejected(reason).with_details(BehaviorDetails::Feet(details)));
    }

    // Stage 2: Score motion in the bottom band and the ankle trajectories
    let motion = tap_motion(
        frames,
        &TapMotionParams {
            pixel_threshold: config.motion_pixel_threshold,
            tap_change_ratio: config.motion_tap_change_ratio,
            tap_intensity: config.motion_tap_intensity,
            bottom_fraction: Some(config.motion_region_fraction),
        },
    );
    let motion = motion_signal(
        &motion,
        &MotionRule {
            min_taps: config.motion_min_taps,
            min_movement: config.motion_min_movement,
            movement_gain: 15.0,
            tap_gain: 0.08,
        },
    );
    let ankle = landmark_signal(
        &tracks.ankles,
        &LandmarkRule {
            min_positions: config.landmark_min_positions,
            step_px: config.landmark_step_px,
            min_taps: config.landmark_min_taps,
            min_avg_px: config.landmark_min_avg_px,
            avg_gain: 0.03,
            tap_gain: 0.12,
        },
    );

    // Stage 3: Fuse
    let signals = vec![motion, ankle];
    let outcome = fuse(
        &signals,
        &FusionRule {
            min_methods: config.min_methods,
            min_confidence: config.min_confidence,
            min_taps: config.min_taps,
        },
    );

    info!(
        behavior = "tapping_feet",
        detected = outcome.detected,
        confidence = outcome.confidence,
        methods = outcome.methods_agreeing,
        taps = outcome.tap_count,
        "foot fusion complete"
    );

    details.tap_count = if outcome.detected { outcome.tap_count } else { 0 };
    details.methods_agreeing = outcome.methods_agreeing;
    details.signals = signals;

    Ok(verdict(outcome).with_details(BehaviorDetails::Feet(details)))
}

fn verdict(outcome: FusionOutcome) -> DetectionResult {
    if outcome.detected {
        DetectionResult::new(true, outcome.confidence).with_reason(ReasonCode::PatternDetected)
    } else {
        DetectionResult::rejected(ReasonCode::FusionRejected)
    }
}
