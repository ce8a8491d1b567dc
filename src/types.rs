//! Core types for the Kinesense engine
//!
//! This module defines the data that flows through each stage: decoded frames,
//! landmark observations, trajectories, evidence signals and the unified
//! detection result handed back to the caller.

use chrono::{DateTime, Utc};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Decimal places every emitted confidence is rounded to
pub const CONFIDENCE_DECIMALS: i32 = 4;

/// Monitored behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    EyeGaze,
    TappingHands,
    TappingFeet,
    SitStand,
    RapidTalking,
}

impl BehaviorKind {
    pub const ALL: [BehaviorKind; 5] = [
        BehaviorKind::EyeGaze,
        BehaviorKind::TappingHands,
        BehaviorKind::TappingFeet,
        BehaviorKind::SitStand,
        BehaviorKind::RapidTalking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorKind::EyeGaze => "eye_gaze",
            BehaviorKind::TappingHands => "tapping_hands",
            BehaviorKind::TappingFeet => "tapping_feet",
            BehaviorKind::SitStand => "sit_stand",
            BehaviorKind::RapidTalking => "rapid_talking",
        }
    }

    /// Parse a behavior tag; surrounding whitespace and case are ignored
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Whether the behavior is analyzed from image frames
    pub fn is_visual(&self) -> bool {
        !matches!(self, BehaviorKind::RapidTalking)
    }
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anatomical region the landmark estimator is queried for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Face mesh (468 points)
    Face,
    /// Hand joints (21 points per hand)
    Hands,
    /// Full-body pose (33 points)
    Pose,
}

/// Indices into the 33-point body pose
pub mod pose_index {
    pub const NOSE: usize = 0;
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_HIP: usize = 23;
    pub const RIGHT_HIP: usize = 24;
    pub const LEFT_KNEE: usize = 25;
    pub const RIGHT_KNEE: usize = 26;
    pub const LEFT_ANKLE: usize = 27;
    pub const RIGHT_ANKLE: usize = 28;

    /// Points a full-body posture read depends on
    pub const KEY_POINTS: [usize; 8] = [
        LEFT_SHOULDER,
        RIGHT_SHOULDER,
        LEFT_HIP,
        RIGHT_HIP,
        LEFT_KNEE,
        RIGHT_KNEE,
        LEFT_ANKLE,
        RIGHT_ANKLE,
    ];

    pub const POSE_POINTS: usize = 33;
}

/// A normalized 2-D keypoint with its visibility score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    /// Horizontal position in [0, 1] of frame width
    pub x: f64,
    /// Vertical position in [0, 1] of frame height, top is 0
    pub y: f64,
    /// Visibility / confidence in [0, 1]
    #[serde(default = "full_visibility")]
    pub visibility: f64,
}

fn full_visibility() -> f64 {
    1.0
}

impl LandmarkPoint {
    pub fn new(x: f64, y: f64, visibility: f64) -> Self {
        Self { x, y, visibility }
    }

    /// Position in pixels for a frame of the given size
    pub fn to_pixels(&self, width: u32, height: u32) -> (f64, f64) {
        (self.x * width as f64, self.y * height as f64)
    }
}

/// Landmarks of one detected instance of a region in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub region: Region,
    pub points: Vec<LandmarkPoint>,
}

impl LandmarkSet {
    pub fn new(region: Region, points: Vec<LandmarkPoint>) -> Self {
        Self { region, points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<&LandmarkPoint> {
        self.points.get(index)
    }

    pub fn mean_visibility(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.visibility).sum::<f64>() / self.points.len() as f64
    }

    /// Centroid in normalized coordinates
    pub fn center(&self) -> Option<(f64, f64)> {
        if self.points.is_empty() {
            return None;
        }
        let n = self.points.len() as f64;
        let x = self.points.iter().map(|p| p.x).sum::<f64>() / n;
        let y = self.points.iter().map(|p| p.y).sum::<f64>() / n;
        Some((x, y))
    }
}

/// A decoded visual sample; its position in the batch is its only timestamp
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: usize, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}

/// Typed input for one analysis call
#[derive(Debug, Clone)]
pub enum BehaviorInput {
    /// Decoded raster frames
    Frames(Vec<Frame>),
    /// Precomputed full-body pose, one set per frame
    PoseSequence(Vec<LandmarkSet>),
    /// Numeric samples (e.g. words per minute)
    Samples(Vec<f64>),
}

impl BehaviorInput {
    pub fn len(&self) -> usize {
        match self {
            BehaviorInput::Frames(frames) => frames.len(),
            BehaviorInput::PoseSequence(poses) => poses.len(),
            BehaviorInput::Samples(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-frame positions of one tracked region, with gaps where it was not
/// confidently visible
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    positions: Vec<Option<(f64, f64)>>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: Option<(f64, f64)>) {
        self.positions.push(position);
    }

    /// Frames covered, including gaps
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn observed_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_some()).count()
    }

    pub fn observed(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.positions.iter().filter_map(|p| *p)
    }

    /// Euclidean displacement between consecutive observed positions
    ///
    /// Gaps are skipped rather than bridged with a default position.
    pub fn steps(&self) -> Vec<f64> {
        let observed: Vec<(f64, f64)> = self.observed().collect();
        observed
            .windows(2)
            .map(|w| ((w[1].0 - w[0].0).powi(2) + (w[1].1 - w[0].1).powi(2)).sqrt())
            .collect()
    }
}

/// One evidence stream's verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: &'static str,
    /// Score in [0, 1]
    pub score: f64,
    /// Supporting count (taps, claps, qualifying pairs)
    pub evidence: u32,
    /// Whether this stream alone clears its thresholds
    pub fired: bool,
}

impl Signal {
    pub fn new(name: &'static str, score: f64, evidence: u32, fired: bool) -> Self {
        Self {
            name,
            score: round_confidence(score),
            evidence,
            fired,
        }
    }

    /// A stream that had nothing to look at
    pub fn silent(name: &'static str) -> Self {
        Self::new(name, 0.0, 0, false)
    }
}

/// Body posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Sitting,
    Standing,
    #[default]
    Unknown,
}

impl Posture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Posture::Sitting => "sitting",
            Posture::Standing => "standing",
            Posture::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted posture record shared across invocations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureState {
    pub posture: Posture,
    pub stability_count: u32,
    pub last_transition_time: DateTime<Utc>,
}

impl Default for PostureState {
    fn default() -> Self {
        Self {
            posture: Posture::Unknown,
            stability_count: 0,
            last_transition_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A confirmed posture change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureAction {
    StandingUp,
    SittingDown,
}

impl PostureAction {
    pub fn towards(posture: Posture) -> Option<Self> {
        match posture {
            Posture::Standing => Some(PostureAction::StandingUp),
            Posture::Sitting => Some(PostureAction::SittingDown),
            Posture::Unknown => None,
        }
    }
}

/// Why a result came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NoHandsDetected,
    TooFewAnkleDetections,
    NoShoulders,
    NotFullBody,
    BodySpanTooSmall,
    InsufficientFrames,
    InsufficientData,
    NoPostureConsensus,
    FusionRejected,
    PatternDetected,
    BaselineEstablished,
    MaintainingPosture,
    CooldownActive,
    InsufficientStability,
    ConfidenceTooLow,
    ActionDetected,
    NormalRate,
    ElevatedRate,
    VeryHighRate,
    ClassifierPrediction,
    MotionFallback,
    ModelUnavailable,
    UnsupportedBehavior,
    StateStoreUnavailable,
    InternalFault,
}

/// Repetitive hand pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandPattern {
    Tapping,
    Clapping,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandDetails {
    pub pattern: HandPattern,
    pub tap_count: u32,
    pub clap_count: u32,
    pub tapping_score: f64,
    pub clapping_score: f64,
    pub methods_agreeing: usize,
    pub frames_analyzed: usize,
    pub hand_frames: usize,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FootDetails {
    pub tap_count: u32,
    pub methods_agreeing: usize,
    pub frames_analyzed: usize,
    pub ankle_detections: usize,
    pub full_body_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_span: Option<f64>,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostureDetails {
    pub current_posture: Posture,
    pub previous_posture: Posture,
    pub stability_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<PostureAction>,
    pub posture_confidence: f64,
    pub valid_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GazeDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gaze: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub probabilities: BTreeMap<String, f64>,
    pub eye_crops: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechDetails {
    pub avg_wpm: f64,
    pub samples: usize,
}

/// Behavior-specific fields merged into the top level of a result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BehaviorDetails {
    Hands(HandDetails),
    Feet(FootDetails),
    Posture(PostureDetails),
    Gaze(GazeDetails),
    Speech(SpeechDetails),
}

/// The unified output of every analysis call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(flatten)]
    pub details: Option<BehaviorDetails>,
}

impl DetectionResult {
    /// Build a verdict; the confidence is sanitized and rounded
    pub fn new(detected: bool, confidence: f64) -> Self {
        Self {
            detected,
            confidence: round_confidence(confidence),
            error: None,
            reason: None,
            fallback: false,
            details: None,
        }
    }

    /// A negative verdict with zero confidence
    pub fn rejected(reason: ReasonCode) -> Self {
        Self::new(false, 0.0).with_reason(reason)
    }

    /// The degraded result for a fault: `{detected:false, confidence:0, error}`
    pub fn failure(error: impl Into<String>) -> Self {
        let mut result = Self::new(false, 0.0);
        result.error = Some(error.into());
        result
    }

    pub fn with_reason(mut self, reason: ReasonCode) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_details(mut self, details: BehaviorDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    /// 0/1 label used by batch output
    pub fn label(&self) -> u8 {
        u8::from(self.detected)
    }
}

/// Clamp to [0, 1] and round to the fixed output precision; non-finite is 0
pub fn round_confidence(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10f64.powi(CONFIDENCE_DECIMALS);
    (value.clamp(0.0, 1.0) * scale).round() / scale
}

/// Round to two decimals, for human-facing magnitudes
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_behavior_parse_round_trips_tags() {
        for kind in BehaviorKind::ALL {
            assert_eq!(BehaviorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BehaviorKind::parse(" Sit_Stand "), Some(BehaviorKind::SitStand));
        assert_eq!(BehaviorKind::parse("juggling"), None);
    }

    #[test]
    fn test_round_confidence_clamps_and_rounds() {
        assert_eq!(round_confidence(0.123456), 0.1235);
        assert_eq!(round_confidence(1.7), 1.0);
        assert_eq!(round_confidence(-0.2), 0.0);
        assert_eq!(round_confidence(f64::NAN), 0.0);
        assert_eq!(round_confidence(f64::INFINITY), 0.0);
    }

    #[test]
    fn test_trajectory_skips_gaps() {
        let mut trajectory = Trajectory::new();
        trajectory.push(Some((0.0, 0.0)));
        trajectory.push(None);
        trajectory.push(Some((3.0, 4.0)));
        trajectory.push(Some((3.0, 4.0)));

        assert_eq!(trajectory.len(), 4);
        assert_eq!(trajectory.observed_count(), 3);
        assert_eq!(trajectory.steps(), vec![5.0, 0.0]);
    }

    #[test]
    fn test_result_serializes_flat() {
        let result = DetectionResult::new(true, 0.5)
            .with_reason(ReasonCode::ElevatedRate)
            .with_details(BehaviorDetails::Speech(SpeechDetails {
                avg_wpm: 185.0,
                samples: 2,
            }));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "detected": true,
                "confidence": 0.5,
                "reason": "elevated_rate",
                "avg_wpm": 185.0,
                "samples": 2
            })
        );
    }

    #[test]
    fn test_failure_result_shape() {
        let json = serde_json::to_value(DetectionResult::failure("insufficient_data")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "detected": false,
                "confidence": 0.0,
                "error": "insufficient_data"
            })
        );
    }

    #[test]
    fn test_landmark_set_center_and_visibility() {
        let set = LandmarkSet::new(
            Region::Hands,
            vec![
                LandmarkPoint::new(0.2, 0.4, 0.5),
                LandmarkPoint::new(0.4, 0.6, 1.0),
            ],
        );
        let (x, y) = set.center().unwrap();
        assert!((x - 0.3).abs() < 1e-12);
        assert!((y - 0.5).abs() < 1e-12);
        assert_eq!(set.mean_visibility(), 0.75);
    }
}
