//! Frame and signal decoding
//!
//! Callers send loosely shaped JSON: a bare list, a single string, or a
//! mapping holding the list under one of several keys. Everything is
//! normalized here into one typed [`BehaviorInput`] so downstream stages never
//! look at raw payload shape again.
//!
//! Unusable items (corrupt base64, undecodable images, NaN samples) are dropped
//! and the batch continues; only an empty result is an error.

use crate::error::DetectError;
use crate::types::{pose_index, BehaviorInput, BehaviorKind, Frame, LandmarkPoint, LandmarkSet, Region};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, warn};

/// Keys a mapping payload may carry its item list under, after the behavior tag
const LIST_KEYS: [&str; 4] = ["frame_sequence", "frames", "data", "frame"];

/// Normalize a payload into typed input for `kind`
pub fn decode_input(kind: BehaviorKind, payload: &Value) -> Result<BehaviorInput, DetectError> {
    let items = payload_items(kind, payload);

    match kind {
        BehaviorKind::RapidTalking => {
            let samples = decode_samples(&items);
            if samples.is_empty() {
                return Err(DetectError::InsufficientData(
                    "no numeric samples in payload".to_string(),
                ));
            }
            Ok(BehaviorInput::Samples(samples))
        }
        BehaviorKind::SitStand if items.first().is_some_and(Value::is_array) => {
            let poses: Vec<LandmarkSet> = items.iter().filter_map(decode_pose_row).collect();
            if poses.is_empty() {
                return Err(DetectError::InsufficientData(
                    "no usable pose rows in payload".to_string(),
                ));
            }
            debug!(rows = items.len(), usable = poses.len(), "decoded pose rows");
            Ok(BehaviorInput::PoseSequence(poses))
        }
        _ => {
            let frames = decode_frames(&items);
            if frames.is_empty() {
                return Err(DetectError::InsufficientData(format!(
                    "no decodable frames among {} items",
                    items.len()
                )));
            }
            Ok(BehaviorInput::Frames(frames))
        }
    }
}

/// Flatten any accepted payload shape into its list of items
///
/// An outer wrapper keyed by the behavior tag is unwrapped first.
pub fn payload_items(kind: BehaviorKind, payload: &Value) -> Vec<Value> {
    let payload = match payload {
        Value::Object(map) => map.get(kind.as_str()).unwrap_or(payload),
        other => other,
    };

    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(map) => LIST_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find(|value| !is_empty_value(value))
            .map(|value| match value {
                Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            })
            .unwrap_or_default(),
        Value::Null => Vec::new(),
        single => vec![single.clone()],
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Decode every image-bearing item, keeping each frame's original position
pub fn decode_frames(items: &[Value]) -> Vec<Frame> {
    let frames: Vec<Frame> = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match item.as_str() {
            Some(encoded) => decode_frame(index, encoded),
            None => {
                debug!(frame = index, "skipping non-string frame item");
                None
            }
        })
        .collect();

    if frames.len() < items.len() {
        warn!(
            dropped = items.len() - frames.len(),
            total = items.len(),
            "dropped undecodable frames"
        );
    }
    frames
}

/// Decode one `data:<mime>;base64,<payload>` string or bare base64 image
pub fn decode_frame(index: usize, encoded: &str) -> Option<Frame> {
    let body = match encoded.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => encoded,
    };

    let bytes = match STANDARD.decode(body.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(frame = index, error = %e, "invalid base64");
            return None;
        }
    };

    match image::load_from_memory(&bytes) {
        Ok(img) => Some(Frame::new(index, img.to_rgb8())),
        Err(e) => {
            debug!(frame = index, error = %e, "undecodable image");
            None
        }
    }
}

/// Keep finite numeric samples; numeric strings are accepted
pub fn decode_samples(items: &[Value]) -> Vec<f64> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
        .collect()
}

/// Decode a precomputed pose row
///
/// A row is 33 points either as 66 numbers (x, y pairs, fully visible) or as
/// 99 numbers (x, y, visibility triples).
pub fn decode_pose_row(row: &Value) -> Option<LandmarkSet> {
    let values = row.as_array()?;
    let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    if numbers.len() != values.len() || numbers.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let stride = match numbers.len() {
        n if n == pose_index::POSE_POINTS * 2 => 2,
        n if n == pose_index::POSE_POINTS * 3 => 3,
        n => {
            debug!(len = n, "pose row has unexpected length");
            return None;
        }
    };

    let points = numbers
        .chunks(stride)
        .map(|c| LandmarkPoint::new(c[0], c[1], if stride == 3 { c[2] } else { 1.0 }))
        .collect();
    Some(LandmarkSet::new(Region::Pose, points))
}
