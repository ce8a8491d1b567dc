//! Per-call posture estimate
//!
//! Each frame is classified from five geometric ratios of the body, each
//! leaning sitting or standing on its own. Frames then vote, and a posture is
//! accepted only on a super-majority of both vote weight and frame count.

use crate::config::PostureConfig;
use crate::tracker::key_points_visible;
use crate::types::{pose_index, LandmarkSet, Posture, ReasonCode};
use tracing::debug;

/// Smallest denominator used in ratio indicators
const MIN_SPAN: f64 = 0.1;
/// Per-frame confidence ceiling
const MAX_FRAME_CONFIDENCE: f64 = 0.95;
/// Vote weight at which support stops growing
const FULL_SUPPORT_WEIGHT: f64 = 3.0;
const MAX_SUPPORT: f64 = 1.2;

/// One geometric indicator and its thresholds
///
/// Every indicator reads large values as sitting and small values as
/// standing; the band in between abstains.
struct Indicator {
    /// Vote weight
    weight: f64,
    /// How far this indicator alone is trusted
    reliability: f64,
    /// Value above which the frame leans sitting
    sitting_above: f64,
    /// Value below which the frame leans standing
    standing_below: f64,
}

impl Indicator {
    fn lean(&self, value: f64) -> Option<Posture> {
        if value > self.sitting_above {
            Some(Posture::Sitting)
        } else if value < self.standing_below {
            Some(Posture::Standing)
        } else {
            None
        }
    }
}

/// Shoulder-to-ankle height over nose-to-ankle height
///
/// The one indicator that reads the other way round: a compressed body sits.
fn compression_lean(value: f64) -> Option<Posture> {
    if value < 0.75 {
        Some(Posture::Sitting)
    } else if value > 0.90 {
        Some(Posture::Standing)
    } else {
        None
    }
}

const COMPRESSION_WEIGHT: f64 = 3.0;
const COMPRESSION_RELIABILITY: f64 = 0.9;

/// Vertical hip-to-knee gap
const HIP_KNEE_GAP: Indicator = Indicator {
    weight: 2.0,
    reliability: 0.8,
    sitting_above: 0.08,
    standing_below: -0.02,
};

/// Vertical thigh length relative to the torso
const THIGH_RATIO: Indicator = Indicator {
    weight: 2.0,
    reliability: 0.7,
    sitting_above: 0.5,
    standing_below: 0.3,
};

/// Vertical thigh length relative to hip-to-ankle height
const KNEE_BEND: Indicator = Indicator {
    weight: 1.0,
    reliability: 0.6,
    sitting_above: 0.6,
    standing_below: 0.4,
};

/// Torso share of shoulder-to-ankle height
const TORSO_SHARE: Indicator = Indicator {
    weight: 1.0,
    reliability: 0.5,
    sitting_above: 0.55,
    standing_below: 0.40,
};

/// Posture read from a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePosture {
    pub posture: Posture,
    pub confidence: f64,
}

/// Accepted posture for a call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostureEstimate {
    pub posture: Posture,
    /// Winning share of vote weight
    pub confidence: f64,
    /// Frames whose read was confident enough to vote
    pub valid_frames: usize,
}

fn avg_y(pose: &LandmarkSet, left: usize, right: usize) -> Option<f64> {
    Some((pose.point(left)?.y + pose.point(right)?.y) / 2.0)
}

/// Classify one frame
///
/// Returns `None` when key landmarks are not visible enough or the
/// indicators do not lean one way.
pub fn classify_frame(pose: &LandmarkSet, config: &PostureConfig) -> Option<FramePosture> {
    if !key_points_visible(pose, config) {
        return None;
    }

    let nose = pose.point(pose_index::NOSE)?.y;
    let shoulder = avg_y(pose, pose_index::LEFT_SHOULDER, pose_index::RIGHT_SHOULDER)?;
    let hip = avg_y(pose, pose_index::LEFT_HIP, pose_index::RIGHT_HIP)?;
    let knee = avg_y(pose, pose_index::LEFT_KNEE, pose_index::RIGHT_KNEE)?;
    let ankle = avg_y(pose, pose_index::LEFT_ANKLE, pose_index::RIGHT_ANKLE)?;

    let torso = hip - shoulder;
    let thigh = knee - hip;
    let body = ankle - shoulder;

    let mut sitting = Tally::default();
    let mut standing = Tally::default();
    let mut tally = |lean: Option<Posture>, weight: f64, reliability: f64| match lean {
        Some(Posture::Sitting) => sitting.add(weight, reliability),
        Some(Posture::Standing) => standing.add(weight, reliability),
        _ => {}
    };

    tally(
        compression_lean(body / (ankle - nose).abs().max(MIN_SPAN)),
        COMPRESSION_WEIGHT,
        COMPRESSION_RELIABILITY,
    );
    let readings = [
        (&HIP_KNEE_GAP, thigh),
        (&THIGH_RATIO, thigh / torso.max(MIN_SPAN)),
        (&KNEE_BEND, thigh.abs() / (ankle - hip).abs().max(MIN_SPAN)),
        (&TORSO_SHARE, torso / body.max(MIN_SPAN)),
    ];
    for (indicator, value) in readings {
        tally(indicator.lean(value), indicator.weight, indicator.reliability);
    }

    let (posture, winner) = if sitting.weight > standing.weight {
        (Posture::Sitting, &sitting)
    } else if standing.weight > sitting.weight {
        (Posture::Standing, &standing)
    } else {
        return None;
    };

    let strength = winner.weight / (sitting.weight + standing.weight);
    let support = (winner.weight / FULL_SUPPORT_WEIGHT).min(MAX_SUPPORT);
    let confidence = (strength * winner.mean_reliability() * support).min(MAX_FRAME_CONFIDENCE);

    Some(FramePosture {
        posture,
        confidence,
    })
}

#[derive(Default)]
struct Tally {
    weight: f64,
    reliability: f64,
    count: usize,
}

impl Tally {
    fn add(&mut self, weight: f64, reliability: f64) {
        self.weight += weight;
        self.reliability += reliability;
        self.count += 1;
    }

    fn mean_reliability(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.reliability / self.count as f64
        }
    }
}

/// Vote over the most recent frames
pub fn estimate_posture(
    poses: &[LandmarkSet],
    config: &PostureConfig,
) -> Result<PostureEstimate, ReasonCode> {
    let window = &poses[poses.len().saturating_sub(config.analysis_window)..];

    let votes: Vec<FramePosture> = window
        .iter()
        .filter_map(|pose| classify_frame(pose, config))
        .filter(|read| read.confidence > config.frame_min_confidence)
        .collect();

    debug!(window = window.len(), votes = votes.len(), "posture frames classified");

    if votes.len() < config.min_valid_frames {
        return Err(ReasonCode::InsufficientFrames);
    }

    let total_weight: f64 = votes.iter().map(|v| v.confidence).sum();
    let best = [Posture::Sitting, Posture::Standing]
        .into_iter()
        .map(|posture| {
            let (weight, count) = votes
                .iter()
                .filter(|v| v.posture == posture)
                .fold((0.0, 0usize), |(w, c), v| (w + v.confidence, c + 1));
            (posture, weight / total_weight, count)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1));

    match best {
        Some((posture, share, count))
            if share >= config.consensus_weight
                && count as f64 >= config.consensus_count * votes.len() as f64 =>
        {
            Ok(PostureEstimate {
                posture,
                confidence: share,
                valid_frames: votes.len(),
            })
        }
        _ => Err(ReasonCode::NoPostureConsensus),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tracker::tests::pose;

    pub(crate) fn sitting_pose() -> LandmarkSet {
        pose(0.05, 0.3, 0.55, 0.65, 0.85, 0.9)
    }

    pub(crate) fn standing_pose() -> LandmarkSet {
        pose(0.05, 0.1, 0.55, 0.6, 0.95, 0.9)
    }

    #[test]
    fn test_sitting_frame() {
        // Compression and hip-knee gap sit (weight 5), knee bend stands (weight 1)
        let read = classify_frame(&sitting_pose(), &PostureConfig::default()).unwrap();
        assert_eq!(read.posture, Posture::Sitting);
        assert!((read.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_standing_frame() {
        let read = classify_frame(&standing_pose(), &PostureConfig::default()).unwrap();
        assert_eq!(read.posture, Posture::Standing);
        assert!((read.confidence - 0.88).abs() < 1e-9);
    }

    #[test]
    fn test_support_scales_with_vote_weight() {
        // Gap and thigh ratio sit (weight 4), compression stands (weight 3):
        // 4/7 strength * 0.75 mean reliability * 1.2 capped support
        let split = pose(0.1, 0.15, 0.5, 0.72, 0.95, 0.9);
        let read = classify_frame(&split, &PostureConfig::default()).unwrap();
        assert_eq!(read.posture, Posture::Sitting);
        assert!((read.confidence - 4.0 / 7.0 * 0.75 * 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_confident_frames_reach_an_estimate() {
        let estimate = estimate_posture(&vec![sitting_pose(); 8], &PostureConfig::default()).unwrap();
        assert_eq!(estimate.posture, Posture::Sitting);
        assert_eq!(estimate.valid_frames, 8);
        assert_eq!(estimate.confidence, 1.0);
    }

    #[test]
    fn test_tied_indicators_abstain() {
        // Compression sits (weight 3), thigh ratio and knee bend stand (weight 3)
        let tied = pose(0.1, 0.35, 0.6, 0.64, 0.9, 0.9);
        assert!(classify_frame(&tied, &PostureConfig::default()).is_none());
    }

    #[test]
    fn test_hidden_landmarks_do_not_vote() {
        let hidden = pose(0.1, 0.35, 0.6, 0.64, 0.9, 0.2);
        assert!(classify_frame(&hidden, &PostureConfig::default()).is_none());
    }

    #[test]
    fn test_consensus_accepts_majority() {
        let mut poses = vec![sitting_pose(); 7];
        poses.push(standing_pose());
        let estimate = estimate_posture(&poses, &PostureConfig::default()).unwrap();

        assert_eq!(estimate.posture, Posture::Sitting);
        assert_eq!(estimate.valid_frames, 8);
        assert!(estimate.confidence > 0.85);
    }

    #[test]
    fn test_split_vote_has_no_consensus() {
        let mut poses = vec![sitting_pose(); 4];
        poses.extend(vec![standing_pose(); 4]);
        assert_eq!(
            estimate_posture(&poses, &PostureConfig::default()),
            Err(ReasonCode::NoPostureConsensus)
        );
    }

    #[test]
    fn test_too_few_frames() {
        let poses = vec![sitting_pose(); 5];
        assert_eq!(
            estimate_posture(&poses, &PostureConfig::default()),
            Err(ReasonCode::InsufficientFrames)
        );
    }

    #[test]
    fn test_only_recent_window_counts() {
        let mut poses = vec![sitting_pose(); 20];
        poses.extend(vec![standing_pose(); 12]);
        let estimate = estimate_posture(&poses, &PostureConfig::default()).unwrap();

        assert_eq!(estimate.posture, Posture::Standing);
        assert_eq!(estimate.confidence, 1.0);
    }
}
