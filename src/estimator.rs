//! Landmark estimator seam
//!
//! Finding faces, hands and joints in a raster is outside this crate; it is
//! consumed through [`LandmarkEstimator`]. [`PrecomputedEstimator`] replays
//! landmarks produced elsewhere, which is how the CLI and C ABI run the
//! engine without an in-process vision model.

use crate::error::DetectError;
use crate::types::{Frame, LandmarkPoint, LandmarkSet, Region};
use serde::Deserialize;
use std::path::Path;

/// External keypoint detector
///
/// Returns one [`LandmarkSet`] per detected instance of `region` (two hands
/// yield two sets). An empty vector means the region was not visible. Points
/// must carry their own visibility score.
pub trait LandmarkEstimator: Send + Sync {
    fn detect(&self, frame: &Frame, region: Region) -> Result<Vec<LandmarkSet>, DetectError>;
}

/// Estimator that never sees anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEstimator;

impl LandmarkEstimator for NoopEstimator {
    fn detect(&self, _frame: &Frame, _region: Region) -> Result<Vec<LandmarkSet>, DetectError> {
        Ok(Vec::new())
    }
}

/// A point as written in landmark files: `[x, y]`, `[x, y, v]` or an object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawPoint {
    Triple([f64; 3]),
    Pair([f64; 2]),
    Object(LandmarkPoint),
}

impl From<RawPoint> for LandmarkPoint {
    fn from(raw: RawPoint) -> Self {
        match raw {
            RawPoint::Triple([x, y, v]) => LandmarkPoint::new(x, y, v),
            RawPoint::Pair([x, y]) => LandmarkPoint::new(x, y, 1.0),
            RawPoint::Object(point) => point,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawFrame {
    hands: Vec<Vec<RawPoint>>,
    pose: Vec<Vec<RawPoint>>,
    face: Vec<Vec<RawPoint>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLandmarkFile {
    frames: Vec<RawFrame>,
}

#[derive(Debug, Clone, Default)]
struct FrameLandmarks {
    hands: Vec<LandmarkSet>,
    pose: Vec<LandmarkSet>,
    face: Vec<LandmarkSet>,
}

/// Replays landmarks recorded per frame index
///
/// JSON shape: `{"frames":[{"hands":[[...]],"pose":[[...]],"face":[[...]]}]}`.
/// Frames past the end of the file, or regions a frame does not list, are
/// reported as not visible.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedEstimator {
    frames: Vec<FrameLandmarks>,
}

impl PrecomputedEstimator {
    pub fn from_json(json: &str) -> Result<Self, DetectError> {
        let raw: RawLandmarkFile = serde_json::from_str(json)
            .map_err(|e| DetectError::Estimator(format!("invalid landmark file: {e}")))?;

        let convert = |region: Region, instances: Vec<Vec<RawPoint>>| -> Vec<LandmarkSet> {
            instances
                .into_iter()
                .filter(|points| !points.is_empty())
                .map(|points| LandmarkSet::new(region, points.into_iter().map(Into::into).collect()))
                .collect()
        };

        let frames = raw
            .frames
            .into_iter()
            .map(|frame| FrameLandmarks {
                hands: convert(Region::Hands, frame.hands),
                pose: convert(Region::Pose, frame.pose),
                face: convert(Region::Face, frame.face),
            })
            .collect();

        Ok(Self { frames })
    }

    pub fn from_file(path: &Path) -> Result<Self, DetectError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl LandmarkEstimator for PrecomputedEstimator {
    fn detect(&self, frame: &Frame, region: Region) -> Result<Vec<LandmarkSet>, DetectError> {
        let Some(recorded) = self.frames.get(frame.index) else {
            return Ok(Vec::new());
        };
        Ok(match region {
            Region::Hands => recorded.hands.clone(),
            Region::Pose => recorded.pose.clone(),
            Region::Face => recorded.face.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_precomputed_point_formats() {
        let json = r#"{
            "frames": [
                { "hands": [[[0.1, 0.5, 0.9], [0.2, 0.6]], [{"x": 0.7, "y": 0.5}]] },
                { "pose": [[[0.5, 0.2, 0.8]]] }
            ]
        }"#;
        let estimator = PrecomputedEstimator::from_json(json).unwrap();
        assert_eq!(estimator.frame_count(), 2);

        let frame0 = Frame::new(0, RgbImage::new(4, 4));
        let hands = estimator.detect(&frame0, Region::Hands).unwrap();
        assert_eq!(hands.len(), 2);
        assert_eq!(hands[0].points[0], LandmarkPoint::new(0.1, 0.5, 0.9));
        assert_eq!(hands[0].points[1].visibility, 1.0);
        assert_eq!(hands[1].points[0].visibility, 1.0);
        assert!(estimator.detect(&frame0, Region::Pose).unwrap().is_empty());

        let frame9 = Frame::new(9, RgbImage::new(4, 4));
        assert!(estimator.detect(&frame9, Region::Hands).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_landmark_file() {
        let result = PrecomputedEstimator::from_json(r#"{ "frames": 3 }"#);
        assert!(matches!(result, Err(DetectError::Estimator(_))));
    }
}
