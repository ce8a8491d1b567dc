//! Detector configuration
//!
//! Every heuristic threshold the detectors use lives here, grouped per
//! detector. All sections are `serde(default)`, so a config file only needs to
//! name the values it overrides.

use crate::error::DetectError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Thresholds for hand tapping / clapping fusion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandTapConfig {
    /// Mean landmark visibility a hand detection needs to be tracked
    pub min_hand_confidence: f64,
    /// Hands centered above this fraction of frame height are ignored
    pub min_torso_y: f64,
    /// Per-pixel grayscale change counted as "changed" by the motion stream
    pub motion_pixel_threshold: u8,
    /// Changed-pixel ratio a frame pair needs to count as a motion tap
    pub motion_tap_change_ratio: f64,
    /// Mean absolute pixel change a frame pair needs to count as a motion tap
    pub motion_tap_intensity: f64,
    /// Motion taps required for the motion stream to fire
    pub motion_min_taps: u32,
    /// Mean pair movement required for the motion stream to fire
    pub motion_min_movement: f64,
    /// Hand displacement between observations counted as a tap (pixels)
    pub landmark_step_px: f64,
    /// Landmark taps required for the trajectory stream to fire
    pub landmark_min_taps: u32,
    /// Mean hand displacement required for the trajectory stream to fire
    pub landmark_min_avg_px: f64,
    /// Inter-hand distance range required for a clap pattern
    pub clap_min_range_px: f64,
    /// Closest inter-hand distance must fall below this for a clap pattern
    pub clap_max_min_distance_px: f64,
    /// Inter-hand distance counted as hands-together
    pub clap_close_px: f64,
    /// Independent streams that must fire before a positive is reported
    pub min_methods: usize,
    /// Combined confidence floor for a positive
    pub min_confidence: f64,
    /// Minimum tap evidence for a positive
    pub min_taps: u32,
}

impl Default for HandTapConfig {
    fn default() -> Self {
        Self {
            min_hand_confidence: 0.6,
            min_torso_y: 0.3,
            motion_pixel_threshold: 10,
            motion_tap_change_ratio: 0.12,
            motion_tap_intensity: 50.0,
            motion_min_taps: 5,
            motion_min_movement: 0.03,
            landmark_step_px: 15.0,
            landmark_min_taps: 3,
            landmark_min_avg_px: 10.0,
            clap_min_range_px: 40.0,
            clap_max_min_distance_px: 80.0,
            clap_close_px: 120.0,
            min_methods: 2,
            min_confidence: 0.4,
            min_taps: 5,
        }
    }
}

/// Thresholds for foot tapping fusion and the full-body gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FootTapConfig {
    pub ankle_min_visibility: f64,
    /// Ankles must sit below this normalized height to be tracked
    pub ankle_min_y: f64,
    pub shoulder_min_visibility: f64,
    /// Shoulders must sit above this normalized height
    pub shoulder_max_y: f64,
    pub hip_min_visibility: f64,
    pub hip_min_y: f64,
    pub hip_max_y: f64,
    /// Accepted ankle observations required across the batch
    pub min_ankle_detections: usize,
    /// Frames where shoulders, hips and ankles are all accepted
    pub min_full_body_frames: usize,
    /// Mean shoulder-to-ankle span as a fraction of frame height
    pub min_body_span: f64,
    /// Motion is sampled from this bottom fraction of the frame
    pub motion_region_fraction: f64,
    pub motion_pixel_threshold: u8,
    pub motion_tap_change_ratio: f64,
    pub motion_tap_intensity: f64,
    pub motion_min_taps: u32,
    pub motion_min_movement: f64,
    pub landmark_step_px: f64,
    /// Observations an ankle trajectory needs before it is analyzed
    pub landmark_min_positions: usize,
    pub landmark_min_taps: u32,
    pub landmark_min_avg_px: f64,
    pub min_methods: usize,
    pub min_confidence: f64,
    pub min_taps: u32,
}

impl Default for FootTapConfig {
    fn default() -> Self {
        Self {
            ankle_min_visibility: 0.75,
            ankle_min_y: 0.8,
            shoulder_min_visibility: 0.7,
            shoulder_max_y: 0.35,
            hip_min_visibility: 0.75,
            hip_min_y: 0.55,
            hip_max_y: 0.8,
            min_ankle_detections: 10,
            min_full_body_frames: 3,
            min_body_span: 0.7,
            motion_region_fraction: 0.25,
            motion_pixel_threshold: 30,
            motion_tap_change_ratio: 0.12,
            motion_tap_intensity: 50.0,
            motion_min_taps: 4,
            motion_min_movement: 0.035,
            landmark_step_px: 20.0,
            landmark_min_positions: 3,
            landmark_min_taps: 4,
            landmark_min_avg_px: 15.0,
            min_methods: 2,
            min_confidence: 0.4,
            min_taps: 4,
        }
    }
}

/// Thresholds for posture estimation and the sit/stand state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureConfig {
    /// Only the most recent frames are classified
    pub analysis_window: usize,
    /// Every key landmark must reach this visibility
    pub key_min_visibility: f64,
    /// Key landmarks must average this visibility
    pub key_mean_visibility: f64,
    pub min_full_body_frames: usize,
    /// Mean shoulder-to-ankle span as a fraction of frame height
    ///
    /// Lower than the foot gate's: a seated body folds at the hips and knees,
    /// so a full-body seated shot spans only a little over half the frame.
    pub min_body_span: f64,
    /// Per-frame posture confidence needed to join the vote
    pub frame_min_confidence: f64,
    pub min_valid_frames: usize,
    /// Share of vote weight the winning posture needs
    pub consensus_weight: f64,
    /// Share of voting frames the winning posture needs
    pub consensus_count: f64,
    pub cooldown_seconds: f64,
    /// Stability count the old posture needs before a change counts
    pub min_stability: u32,
    pub min_transition_confidence: f64,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            analysis_window: 12,
            key_min_visibility: 0.3,
            key_mean_visibility: 0.6,
            min_full_body_frames: 3,
            min_body_span: 0.5,
            frame_min_confidence: 0.4,
            min_valid_frames: 6,
            consensus_weight: 0.65,
            consensus_count: 0.6,
            cooldown_seconds: 15.0,
            min_stability: 5,
            min_transition_confidence: 0.75,
        }
    }
}

/// Eye crop and fallback settings for gaze classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    pub eye_margin_px: f64,
    pub min_crop_px: f64,
    /// Side length of the square crop handed to the classifier
    pub crop_size: u32,
    pub fallback_gain: f64,
    pub fallback_floor: f64,
    pub fallback_ceiling: f64,
    pub fallback_detect_threshold: f64,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            eye_margin_px: 30.0,
            min_crop_px: 30.0,
            crop_size: 64,
            fallback_gain: 1.2,
            fallback_floor: 0.05,
            fallback_ceiling: 0.4,
            fallback_detect_threshold: 0.5,
        }
    }
}

/// Whole-frame motion scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Frames are downsampled to this square size before scoring
    pub analysis_size: u32,
    /// Per-pixel change counted toward the motion ratio
    pub change_threshold: f64,
    /// Below this motion ratio a pair is scored with the penalized weight
    pub ratio_floor: f64,
    pub diff_weight: f64,
    pub ratio_weight: f64,
    pub penalized_weight: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            analysis_size: 100,
            change_threshold: 35.0,
            ratio_floor: 0.03,
            diff_weight: 0.6,
            ratio_weight: 0.4,
            penalized_weight: 0.4,
        }
    }
}

/// How a mean rate at or above `high_wpm` is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighRatePolicy {
    /// Very fast speech is rapid speech: detected at full confidence
    Detect,
    /// Only the middle band counts; very fast rates are not flagged
    Reject,
}

/// Words-per-minute bands for rapid speech
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub low_wpm: f64,
    pub high_wpm: f64,
    pub low_confidence: f64,
    pub band_confidence: f64,
    pub high_confidence: f64,
    pub high_rate_policy: HighRatePolicy,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            low_wpm: 150.0,
            high_wpm: 200.0,
            low_confidence: 0.1,
            band_confidence: 0.5,
            high_confidence: 1.0,
            high_rate_policy: HighRatePolicy::Detect,
        }
    }
}

/// All detector thresholds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub hands: HandTapConfig,
    pub feet: FootTapConfig,
    pub posture: PostureConfig,
    pub gaze: GazeConfig,
    pub motion: MotionConfig,
    pub speech: SpeechConfig,
}

impl DetectorConfig {
    /// Parse a (possibly partial) JSON config and validate it
    pub fn from_json(json: &str) -> Result<Self, DetectError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: &Path) -> Result<Self, DetectError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject values that would make a detector meaningless
    pub fn validate(&self) -> Result<(), DetectError> {
        let unit_values = [
            ("hands.min_hand_confidence", self.hands.min_hand_confidence),
            ("hands.min_torso_y", self.hands.min_torso_y),
            ("hands.min_confidence", self.hands.min_confidence),
            ("feet.ankle_min_visibility", self.feet.ankle_min_visibility),
            ("feet.min_body_span", self.feet.min_body_span),
            ("feet.motion_region_fraction", self.feet.motion_region_fraction),
            ("feet.min_confidence", self.feet.min_confidence),
            ("posture.key_min_visibility", self.posture.key_min_visibility),
            ("posture.consensus_weight", self.posture.consensus_weight),
            ("posture.consensus_count", self.posture.consensus_count),
            (
                "posture.min_transition_confidence",
                self.posture.min_transition_confidence,
            ),
        ];
        for (name, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.hands.min_methods == 0 || self.feet.min_methods == 0 {
            return Err(DetectError::Config(
                "min_methods must be at least 1".to_string(),
            ));
        }
        if self.posture.cooldown_seconds < 0.0 {
            return Err(DetectError::Config(
                "posture.cooldown_seconds must not be negative".to_string(),
            ));
        }
        if self.posture.analysis_window == 0 {
            return Err(DetectError::Config(
                "posture.analysis_window must be at least 1".to_string(),
            ));
        }
        if self.speech.low_wpm >= self.speech.high_wpm {
            return Err(DetectError::Config(format!(
                "speech.low_wpm ({}) must be below speech.high_wpm ({})",
                self.speech.low_wpm, self.speech.high_wpm
            )));
        }
        if self.gaze.fallback_floor > self.gaze.fallback_ceiling {
            return Err(DetectError::Config(format!(
                "gaze.fallback_floor ({}) must not exceed gaze.fallback_ceiling ({})",
                self.gaze.fallback_floor, self.gaze.fallback_ceiling
            )));
        }
        if self.gaze.min_crop_px < 1.0 {
            return Err(DetectError::Config(
                "gaze.min_crop_px must be at least 1".to_string(),
            ));
        }
        if self.gaze.crop_size == 0 || self.motion.analysis_size == 0 {
            return Err(DetectError::Config(
                "crop and analysis sizes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "kinesense=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Host-level configuration for the CLI and C ABI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where the persisted posture record lives.
    pub state_file: PathBuf,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Detector thresholds.
    pub detectors: DetectorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            logging: LoggingConfig::default(),
            detectors: DetectorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config from a JSON file, validating detector thresholds.
    pub fn from_file(path: &Path) -> Result<Self, DetectError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.detectors.validate()?;
        Ok(config)
    }
}

/// Default posture state location.
fn default_state_file() -> PathBuf {
    let base = std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("state")
        });
    base.join("kinesense").join("sit_stand_state.json")
}
