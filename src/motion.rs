//! Motion signal estimation
//!
//! Raw-pixel evidence that does not depend on landmarks. Two estimators live
//! here:
//!
//! - [`tap_motion`] scores every consecutive frame pair of a batch and counts
//!   "motion taps" (pairs with a large, intense change). It feeds the tapping
//!   fusion and may be restricted to the bottom band of the frame.
//! - [`movement_score`] is the whole-frame estimate used when a classifier
//!   cannot run. It samples disjoint pairs on a downscaled frame.
//!
//! Neither estimator decides anything on its own.

use crate::config::MotionConfig;
use crate::types::Frame;
use image::imageops::{self, FilterType};
use image::GrayImage;
use tracing::debug;

/// Weight of the changed-pixel ratio in a tap-motion pair score
const CHANGE_RATIO_WEIGHT: f64 = 0.7;
/// Weight of the normalized mean intensity in a tap-motion pair score
const INTENSITY_WEIGHT: f64 = 0.3;

/// Thresholds for [`tap_motion`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapMotionParams {
    /// Grayscale change counted as a changed pixel
    pub pixel_threshold: u8,
    /// Changed-pixel ratio a pair must exceed to be a tap
    pub tap_change_ratio: f64,
    /// Mean absolute change a pair must exceed to be a tap
    pub tap_intensity: f64,
    /// Restrict analysis to this bottom fraction of the frame
    pub bottom_fraction: Option<f64>,
}

/// Change between two consecutive frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMotion {
    pub change_ratio: f64,
    /// Mean absolute grayscale difference, 0..=255
    pub intensity: f64,
    pub movement: f64,
    pub tap: bool,
}

/// Tap-motion evidence for a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TapMotion {
    pub pairs: Vec<PairMotion>,
    pub taps: u32,
    pub mean_movement: f64,
    pub max_movement: f64,
}

/// Score every consecutive frame pair
pub fn tap_motion(frames: &[Frame], params: &TapMotionParams) -> TapMotion {
    let grays: Vec<GrayImage> = frames
        .iter()
        .map(|frame| analysis_region(frame, params.bottom_fraction))
        .collect();

    let pairs: Vec<PairMotion> = grays
        .windows(2)
        .filter_map(|w| pair_motion(&w[0], &w[1], params))
        .collect();

    let taps = pairs.iter().filter(|p| p.tap).count() as u32;
    let (mean_movement, max_movement) = mean_and_max(pairs.iter().map(|p| p.movement));

    debug!(
        pairs = pairs.len(),
        taps,
        mean_movement,
        max_movement,
        "tap motion scored"
    );

    TapMotion {
        pairs,
        taps,
        mean_movement,
        max_movement,
    }
}

/// Grayscale frame, cropped to the bottom band when requested
fn analysis_region(frame: &Frame, bottom_fraction: Option<f64>) -> GrayImage {
    let gray = frame.luma();
    let Some(fraction) = bottom_fraction else {
        return gray;
    };

    let (width, height) = gray.dimensions();
    let band = ((height as f64) * fraction.clamp(0.0, 1.0)).round() as u32;
    let band = band.clamp(1, height.max(1));
    let top = height.saturating_sub(band);
    imageops::crop_imm(&gray, 0, top, width, height - top).to_image()
}

/// Compare two grayscale frames; mismatched sizes are scaled to the smaller
pub fn pair_motion(prev: &GrayImage, curr: &GrayImage, params: &TapMotionParams) -> Option<PairMotion> {
    let (prev, curr) = same_size(prev, curr)?;

    let total = (prev.width() as usize) * (prev.height() as usize);
    let mut changed = 0usize;
    let mut diff_sum = 0u64;
    for (a, b) in prev.pixels().zip(curr.pixels()) {
        let diff = a.0[0].abs_diff(b.0[0]);
        diff_sum += diff as u64;
        if diff > params.pixel_threshold {
            changed += 1;
        }
    }

    let change_ratio = changed as f64 / total as f64;
    let intensity = diff_sum as f64 / total as f64;
    let movement = change_ratio * CHANGE_RATIO_WEIGHT + (intensity / 255.0) * INTENSITY_WEIGHT;
    let tap = change_ratio > params.tap_change_ratio && intensity > params.tap_intensity;

    Some(PairMotion {
        change_ratio,
        intensity,
        movement,
        tap,
    })
}

fn same_size(a: &GrayImage, b: &GrayImage) -> Option<(GrayImage, GrayImage)> {
    if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
        return None;
    }
    if a.dimensions() == b.dimensions() {
        return Some((a.clone(), b.clone()));
    }
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    Some((
        imageops::resize(a, width, height, FilterType::Triangle),
        imageops::resize(b, width, height, FilterType::Triangle),
    ))
}

fn mean_and_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut max = 0.0f64;
    for v in values {
        count += 1;
        sum += v;
        max = max.max(v);
    }
    if count == 0 {
        (0.0, 0.0)
    } else {
        (sum / count as f64, max)
    }
}

/// Whole-frame movement estimate for a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementScore {
    pub pair_scores: Vec<f64>,
    pub max: f64,
    pub mean: f64,
    /// `0.7 * max + 0.3 * mean`
    pub combined: f64,
    /// Combined score mapped onto a coarse 0.1..=0.7 scale
    pub score: f64,
}

/// Score disjoint frame pairs (0-1, 2-3, ...) on a downscaled grayscale frame
pub fn movement_score(frames: &[Frame], config: &MotionConfig) -> MovementScore {
    let size = config.analysis_size.max(1);
    let pair_scores: Vec<f64> = frames
        .chunks_exact(2)
        .map(|pair| {
            let a = imageops::resize(&pair[0].luma(), size, size, FilterType::Triangle);
            let b = imageops::resize(&pair[1].luma(), size, size, FilterType::Triangle);
            pair_movement(&a, &b, config)
        })
        .collect();

    if pair_scores.is_empty() {
        return MovementScore {
            score: 0.1,
            ..MovementScore::default()
        };
    }

    let (mean, max) = mean_and_max(pair_scores.iter().copied());
    let combined = max * 0.7 + mean * 0.3;
    let score = if combined < 0.05 {
        0.1
    } else if combined < 0.1 {
        0.2
    } else {
        (combined * 3.0 + 0.15).min(0.7)
    };

    debug!(pairs = pair_scores.len(), max, mean, combined, score, "movement scored");

    MovementScore {
        pair_scores,
        max,
        mean,
        combined,
        score,
    }
}

/// Blend normalized difference and motion ratio for one pair
fn pair_movement(a: &GrayImage, b: &GrayImage, config: &MotionConfig) -> f64 {
    let total = (a.width() as f64) * (a.height() as f64);
    let mut diff_sum = 0.0;
    let mut moving = 0usize;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let diff = (pa.0[0] as f64 - pb.0[0] as f64).abs();
        diff_sum += diff;
        if diff > config.change_threshold {
            moving += 1;
        }
    }

    let diff = diff_sum / total / 255.0;
    let motion_ratio = moving as f64 / total;
    if motion_ratio < config.ratio_floor {
        diff * config.penalized_weight
    } else {
        diff * config.diff_weight + motion_ratio * config.ratio_weight
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    pub(crate) fn solid_frame(index: usize, value: u8, width: u32, height: u32) -> Frame {
        Frame::new(index, RgbImage::from_pixel(width, height, Rgb([value, value, value])))
    }

    fn params() -> TapMotionParams {
        TapMotionParams {
            pixel_threshold: 10,
            tap_change_ratio: 0.12,
            tap_intensity: 50.0,
            bottom_fraction: None,
        }
    }

    #[test]
    fn test_identical_frames_have_no_motion() {
        let frames = vec![solid_frame(0, 90, 16, 16), solid_frame(1, 90, 16, 16)];
        let motion = tap_motion(&frames, &params());

        assert_eq!(motion.pairs.len(), 1);
        assert_eq!(motion.taps, 0);
        assert_eq!(motion.max_movement, 0.0);
    }

    #[test]
    fn test_alternating_frames_count_taps() {
        let frames: Vec<Frame> = (0..6)
            .map(|i| solid_frame(i, if i % 2 == 0 { 0 } else { 200 }, 16, 16))
            .collect();
        let motion = tap_motion(&frames, &params());

        assert_eq!(motion.taps, 5);
        let pair = motion.pairs[0];
        assert_eq!(pair.change_ratio, 1.0);
        assert_eq!(pair.intensity, 200.0);
        assert!((pair.movement - (0.7 + 200.0 / 255.0 * 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_bottom_band_ignores_upper_motion() {
        let still = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        let mut moved = still.clone();
        for y in 0..10 {
            for x in 0..20 {
                moved.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let frames = vec![Frame::new(0, still), Frame::new(1, moved)];

        let whole = tap_motion(&frames, &params());
        let bottom = tap_motion(
            &frames,
            &TapMotionParams {
                bottom_fraction: Some(0.25),
                ..params()
            },
        );

        assert!(whole.max_movement > 0.3);
        assert_eq!(bottom.max_movement, 0.0);
    }

    #[test]
    fn test_mismatched_sizes_are_compared() {
        let a = GrayImage::from_pixel(10, 10, image::Luma([0]));
        let b = GrayImage::from_pixel(20, 5, image::Luma([100]));
        let pair = pair_motion(&a, &b, &params()).unwrap();
        assert_eq!(pair.change_ratio, 1.0);
    }

    #[test]
    fn test_movement_score_still_frames_floor() {
        let frames: Vec<Frame> = (0..4).map(|i| solid_frame(i, 120, 32, 32)).collect();
        let score = movement_score(&frames, &MotionConfig::default());

        assert_eq!(score.pair_scores.len(), 2);
        assert_eq!(score.score, 0.1);
    }

    #[test]
    fn test_movement_score_large_change_caps() {
        let frames = vec![solid_frame(0, 0, 32, 32), solid_frame(1, 255, 32, 32)];
        let score = movement_score(&frames, &MotionConfig::default());

        assert!((score.combined - 1.0).abs() < 1e-9);
        assert_eq!(score.score, 0.7);
    }

    #[test]
    fn test_movement_score_single_frame() {
        let frames = vec![solid_frame(0, 0, 8, 8)];
        assert_eq!(movement_score(&frames, &MotionConfig::default()).score, 0.1);
    }
}
