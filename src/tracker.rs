//! Landmark trajectory tracking
//!
//! Queries the landmark estimator once per frame and region, keeps only
//! detections that clear their visibility gates and assembles per-region
//! trajectories. A rejected detection is a gap in the trajectory, never a
//! default position.
//!
//! Hand and ankle trajectories are kept in pixels, since their tap thresholds
//! are pixel distances. Body-span checks use normalized heights.

use crate::config::{FootTapConfig, HandTapConfig, PostureConfig};
use crate::estimator::LandmarkEstimator;
use crate::types::{pose_index, Frame, LandmarkSet, ReasonCode, Region, Trajectory};
use tracing::{debug, warn};

/// Ask the estimator for one region, treating a failure as "not observed"
fn detect_or_skip(estimator: &dyn LandmarkEstimator, frame: &Frame, region: Region) -> Vec<LandmarkSet> {
    match estimator.detect(frame, region) {
        Ok(sets) => sets,
        Err(e) => {
            warn!(frame = frame.index, ?region, error = %e, "landmark estimator failed");
            Vec::new()
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

// ============================================================================
// Hands
// ============================================================================

/// Hand trajectories for a batch
#[derive(Debug, Clone, Default)]
pub struct HandTracks {
    pub frames_analyzed: usize,
    /// Frames with at least one accepted hand
    pub hand_frames: usize,
    /// Accepted hand detections across the batch
    pub detections: usize,
    /// Left-most and right-most accepted hand per frame, in pixels
    pub slots: [Trajectory; 2],
    /// Distance between the two hands, for frames where both were accepted
    pub inter_hand_px: Vec<f64>,
}

impl HandTracks {
    pub fn any_hands(&self) -> bool {
        self.detections > 0
    }
}

/// Track hands across frames
///
/// A hand is accepted when its mean visibility clears `min_hand_confidence`
/// and its center lies below `min_torso_y` of the frame height.
pub fn track_hands(
    frames: &[Frame],
    estimator: &dyn LandmarkEstimator,
    config: &HandTapConfig,
) -> HandTracks {
    let mut tracks = HandTracks {
        frames_analyzed: frames.len(),
        ..HandTracks::default()
    };

    for frame in frames {
        let mut centers: Vec<(f64, f64)> = detect_or_skip(estimator, frame, Region::Hands)
            .iter()
            .filter(|hand| hand.mean_visibility() > config.min_hand_confidence)
            .filter_map(LandmarkSet::center)
            .filter(|&(_, y)| y > config.min_torso_y)
            .map(|(x, y)| (x * frame.width() as f64, y * frame.height() as f64))
            .collect();
        centers.sort_by(|a, b| a.0.total_cmp(&b.0));

        if !centers.is_empty() {
            tracks.hand_frames += 1;
        }
        tracks.detections += centers.len();
        if centers.len() >= 2 {
            tracks.inter_hand_px.push(distance(centers[0], centers[1]));
        }

        debug!(frame = frame.index, hands = centers.len(), "hands tracked");

        tracks.slots[0].push(centers.first().copied());
        tracks.slots[1].push(centers.get(1).copied());
    }

    tracks
}

// ============================================================================
// Feet and the full-body gate
// ============================================================================

/// Ankle trajectories plus the body evidence the full-body gate needs
#[derive(Debug, Clone, Default)]
pub struct FootTracks {
    pub frames_analyzed: usize,
    /// Accepted ankle observations across the batch
    pub ankle_detections: usize,
    /// Frames where both shoulders, both hips and both ankles were accepted
    pub full_body_frames: usize,
    /// Left and right ankle, in pixels
    pub ankles: [Trajectory; 2],
    /// Normalized heights of every accepted ankle
    pub ankle_ys: Vec<f64>,
    /// Normalized heights of every accepted shoulder
    pub shoulder_ys: Vec<f64>,
}

impl FootTracks {
    /// Mean shoulder-to-ankle span as a fraction of frame height
    pub fn body_span(&self) -> Option<f64> {
        Some(mean(&self.ankle_ys)? - mean(&self.shoulder_ys)?)
    }

    /// Check the full-body gate, in order
    pub fn gate(&self, config: &FootTapConfig) -> Result<(), ReasonCode> {
        if self.ankle_detections < config.min_ankle_detections {
            return Err(ReasonCode::TooFewAnkleDetections);
        }
        if self.shoulder_ys.is_empty() {
            return Err(ReasonCode::NoShoulders);
        }
        if self.full_body_frames < config.min_full_body_frames {
            return Err(ReasonCode::NotFullBody);
        }
        match self.body_span() {
            Some(span) if span >= config.min_body_span => Ok(()),
            _ => Err(ReasonCode::BodySpanTooSmall),
        }
    }
}

/// Track ankles and full-body visibility across frames
pub fn track_feet(
    frames: &[Frame],
    estimator: &dyn LandmarkEstimator,
    config: &FootTapConfig,
) -> FootTracks {
    let mut tracks = FootTracks {
        frames_analyzed: frames.len(),
        ..FootTracks::default()
    };

    for frame in frames {
        let poses = detect_or_skip(estimator, frame, Region::Pose);
        let Some(pose) = poses.first() else {
            tracks.ankles[0].push(None);
            tracks.ankles[1].push(None);
            continue;
        };

        let mut ankles_seen = 0;
        for (slot, index) in [pose_index::LEFT_ANKLE, pose_index::RIGHT_ANKLE].into_iter().enumerate() {
            let accepted = pose
                .point(index)
                .filter(|p| p.visibility > config.ankle_min_visibility && p.y > config.ankle_min_y);
            if let Some(p) = accepted {
                tracks.ankle_ys.push(p.y);
                ankles_seen += 1;
            }
            tracks.ankles[slot].push(accepted.map(|p| p.to_pixels(frame.width(), frame.height())));
        }
        tracks.ankle_detections += ankles_seen;

        let mut shoulders_seen = 0;
        for index in [pose_index::LEFT_SHOULDER, pose_index::RIGHT_SHOULDER] {
            if let Some(p) = pose
                .point(index)
                .filter(|p| p.visibility > config.shoulder_min_visibility && p.y < config.shoulder_max_y)
            {
                tracks.shoulder_ys.push(p.y);
                shoulders_seen += 1;
            }
        }

        let hips_seen = [pose_index::LEFT_HIP, pose_index::RIGHT_HIP]
            .into_iter()
            .filter_map(|index| pose.point(index))
            .filter(|p| {
                p.visibility > config.hip_min_visibility
                    && p.y > config.hip_min_y
                    && p.y < config.hip_max_y
            })
            .count();

        if shoulders_seen == 2 && hips_seen == 2 && ankles_seen == 2 {
            tracks.full_body_frames += 1;
        }

        debug!(
            frame = frame.index,
            ankles = ankles_seen,
            shoulders = shoulders_seen,
            hips = hips_seen,
            "feet tracked"
        );
    }

    tracks
}

// ============================================================================
// Full-body pose for posture
// ============================================================================

/// Whether every key posture landmark is present and visible enough
pub fn key_points_visible(pose: &LandmarkSet, config: &PostureConfig) -> bool {
    let visibilities: Option<Vec<f64>> = pose_index::KEY_POINTS
        .iter()
        .map(|&i| pose.point(i).map(|p| p.visibility))
        .collect();
    let Some(visibilities) = visibilities else {
        return false;
    };
    let min = visibilities.iter().copied().fold(f64::INFINITY, f64::min);
    let avg = visibilities.iter().sum::<f64>() / visibilities.len() as f64;
    min >= config.key_min_visibility && avg > config.key_mean_visibility
}

/// Collect one full-body pose per frame from the estimator
///
/// Frames without a pose are dropped here; the posture gate decides whether
/// enough remain.
pub fn track_poses(frames: &[Frame], estimator: &dyn LandmarkEstimator) -> Vec<LandmarkSet> {
    frames
        .iter()
        .filter_map(|frame| detect_or_skip(estimator, frame, Region::Pose).into_iter().next())
        .collect()
}

/// Full-body gate for posture reads
///
/// Requires enough frames with every key landmark visible, and a mean
/// shoulder-to-ankle span across those frames of at least `min_body_span`.
pub fn posture_gate(poses: &[LandmarkSet], config: &PostureConfig) -> Result<(), ReasonCode> {
    let visible: Vec<&LandmarkSet> = poses
        .iter()
        .filter(|pose| key_points_visible(pose, config))
        .collect();
    if visible.len() < config.min_full_body_frames {
        return Err(ReasonCode::NotFullBody);
    }

    let spans: Vec<f64> = visible.iter().filter_map(|pose| shoulder_ankle_span(pose)).collect();
    match mean(&spans) {
        Some(span) if span >= config.min_body_span => Ok(()),
        _ => Err(ReasonCode::BodySpanTooSmall),
    }
}

fn shoulder_ankle_span(pose: &LandmarkSet) -> Option<f64> {
    let y = |i: usize| pose.point(i).map(|p| p.y);
    let shoulders = (y(pose_index::LEFT_SHOULDER)? + y(pose_index::RIGHT_SHOULDER)?) / 2.0;
    let ankles = (y(pose_index::LEFT_ANKLE)? + y(pose_index::RIGHT_ANKLE)?) / 2.0;
    Some(ankles - shoulders)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::DetectError;
    use crate::motion::tests::solid_frame;
    use crate::types::LandmarkPoint;
    use std::collections::HashMap;

    /// Estimator fed from a per-frame, per-region table
    #[derive(Default)]
    pub(crate) struct ScriptedEstimator {
        pub(crate) table: HashMap<(usize, Region), Vec<LandmarkSet>>,
        pub(crate) failing: Vec<usize>,
    }

    impl ScriptedEstimator {
        pub(crate) fn set(&mut self, frame: usize, region: Region, sets: Vec<LandmarkSet>) {
            self.table.insert((frame, region), sets);
        }
    }

    impl LandmarkEstimator for ScriptedEstimator {
        fn detect(&self, frame: &Frame, region: Region) -> Result<Vec<LandmarkSet>, DetectError> {
            if self.failing.contains(&frame.index) {
                return Err(DetectError::Estimator("scripted failure".to_string()));
            }
            Ok(self.table.get(&(frame.index, region)).cloned().unwrap_or_default())
        }
    }

    /// A 21-point hand centered at (x, y)
    pub(crate) fn hand(x: f64, y: f64, visibility: f64) -> LandmarkSet {
        LandmarkSet::new(
            Region::Hands,
            (0..21).map(|_| LandmarkPoint::new(x, y, visibility)).collect(),
        )
    }

    /// A 33-point pose with the given key heights; x spreads left/right
    pub(crate) fn pose(
        nose: f64,
        shoulder: f64,
        hip: f64,
        knee: f64,
        ankle: f64,
        visibility: f64,
    ) -> LandmarkSet {
        let mut points = vec![LandmarkPoint::new(0.5, nose, visibility); pose_index::POSE_POINTS];
        let mut set = |left: usize, right: usize, y: f64| {
            points[left] = LandmarkPoint::new(0.45, y, visibility);
            points[right] = LandmarkPoint::new(0.55, y, visibility);
        };
        set(pose_index::LEFT_SHOULDER, pose_index::RIGHT_SHOULDER, shoulder);
        set(pose_index::LEFT_HIP, pose_index::RIGHT_HIP, hip);
        set(pose_index::LEFT_KNEE, pose_index::RIGHT_KNEE, knee);
        set(pose_index::LEFT_ANKLE, pose_index::RIGHT_ANKLE, ankle);
        LandmarkSet::new(Region::Pose, points)
    }

    fn frames(n: usize) -> Vec<Frame> {
        (0..n).map(|i| solid_frame(i, 0, 100, 100)).collect()
    }

    #[test]
    fn test_low_confidence_and_raised_hands_are_gaps() {
        let mut estimator = ScriptedEstimator::default();
        estimator.set(0, Region::Hands, vec![hand(0.5, 0.6, 0.9)]);
        estimator.set(1, Region::Hands, vec![hand(0.5, 0.6, 0.4)]);
        estimator.set(2, Region::Hands, vec![hand(0.5, 0.1, 0.9)]);

        let tracks = track_hands(&frames(3), &estimator, &HandTapConfig::default());
        assert_eq!(tracks.detections, 1);
        assert_eq!(tracks.hand_frames, 1);
        assert_eq!(tracks.slots[0].len(), 3);
        assert_eq!(tracks.slots[0].observed_count(), 1);
    }

    #[test]
    fn test_two_hands_sorted_and_distance_recorded() {
        let mut estimator = ScriptedEstimator::default();
        estimator.set(0, Region::Hands, vec![hand(0.8, 0.6, 0.9), hand(0.2, 0.6, 0.9)]);

        let tracks = track_hands(&frames(1), &estimator, &HandTapConfig::default());
        let left: Vec<_> = tracks.slots[0].observed().collect();
        assert_eq!(left.len(), 1);
        assert!((left[0].0 - 20.0).abs() < 1e-9);
        assert!((left[0].1 - 60.0).abs() < 1e-9);
        assert_eq!(tracks.inter_hand_px.len(), 1);
        assert!((tracks.inter_hand_px[0] - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimator_failure_is_not_observed() {
        let mut estimator = ScriptedEstimator::default();
        estimator.set(0, Region::Hands, vec![hand(0.5, 0.6, 0.9)]);
        estimator.set(1, Region::Hands, vec![hand(0.5, 0.6, 0.9)]);
        estimator.failing.push(1);

        let tracks = track_hands(&frames(2), &estimator, &HandTapConfig::default());
        assert_eq!(tracks.detections, 1);
    }

    #[test]
    fn test_foot_gate_order() {
        let config = FootTapConfig::default();
        let mut estimator = ScriptedEstimator::default();

        // Ankles visible but no body above them
        for i in 0..6 {
            estimator.set(i, Region::Pose, vec![pose(0.05, 0.5, 0.7, 0.8, 0.9, 0.9)]);
        }
        let tracks = track_feet(&frames(6), &estimator, &config);
        assert_eq!(tracks.ankle_detections, 12);
        assert_eq!(tracks.gate(&config), Err(ReasonCode::NoShoulders));

        // Too few ankles
        let tracks = track_feet(&frames(4), &estimator, &config);
        assert_eq!(tracks.gate(&config), Err(ReasonCode::TooFewAnkleDetections));

        // Full body in view
        for i in 0..6 {
            estimator.set(i, Region::Pose, vec![pose(0.05, 0.15, 0.65, 0.75, 0.9, 0.9)]);
        }
        let tracks = track_feet(&frames(6), &estimator, &config);
        assert_eq!(tracks.full_body_frames, 6);
        assert!((tracks.body_span().unwrap() - 0.75).abs() < 1e-9);
        assert_eq!(tracks.gate(&config), Ok(()));
    }

    #[test]
    fn test_foot_gate_span_too_small() {
        let config = FootTapConfig {
            min_body_span: 0.8,
            ..FootTapConfig::default()
        };
        let mut estimator = ScriptedEstimator::default();
        for i in 0..6 {
            estimator.set(i, Region::Pose, vec![pose(0.05, 0.15, 0.65, 0.75, 0.9, 0.9)]);
        }
        let tracks = track_feet(&frames(6), &estimator, &config);
        assert_eq!(tracks.gate(&config), Err(ReasonCode::BodySpanTooSmall));
    }

    #[test]
    fn test_posture_gate() {
        let config = PostureConfig::default();
        let seated = pose(0.1, 0.35, 0.6, 0.64, 0.9, 0.9);
        assert_eq!(posture_gate(&vec![seated.clone(); 3], &config), Ok(()));
        assert_eq!(
            posture_gate(&vec![seated; 2], &config),
            Err(ReasonCode::NotFullBody)
        );

        let hidden = pose(0.1, 0.35, 0.6, 0.64, 0.9, 0.2);
        assert_eq!(
            posture_gate(&vec![hidden; 5], &config),
            Err(ReasonCode::NotFullBody)
        );

        let close_up = pose(0.1, 0.5, 0.7, 0.75, 0.8, 0.9);
        assert_eq!(
            posture_gate(&vec![close_up; 5], &config),
            Err(ReasonCode::BodySpanTooSmall)
        );
    }

    #[test]
    fn test_seated_span_passes_posture_gate_but_not_foot_span() {
        // Full-body seated shot: shoulders at 0.3, ankles at 0.85
        let seated = vec![pose(0.05, 0.3, 0.55, 0.65, 0.85, 0.9); 4];
        assert_eq!(posture_gate(&seated, &PostureConfig::default()), Ok(()));

        let foot_span = PostureConfig {
            min_body_span: FootTapConfig::default().min_body_span,
            ..PostureConfig::default()
        };
        assert_eq!(
            posture_gate(&seated, &foot_span),
            Err(ReasonCode::BodySpanTooSmall)
        );
    }
}
