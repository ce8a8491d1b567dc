//! Rapid speech detection
//!
//! A pure threshold rule over the mean words-per-minute of the samples; no
//! landmarks or models are involved.

use crate::config::{HighRatePolicy, SpeechConfig};
use crate::error::DetectError;
use crate::types::{round2, BehaviorDetails, DetectionResult, ReasonCode, SpeechDetails};
use tracing::info;

/// Classify a speech rate from words-per-minute samples
///
/// Below `low_wpm` is normal speech. `[low_wpm, high_wpm)` is rapid speech at
/// moderate confidence. At or above `high_wpm` the outcome follows the
/// configured [`HighRatePolicy`].
pub fn detect_rapid_talking(
    samples: &[f64],
    config: &SpeechConfig,
) -> Result<DetectionResult, DetectError> {
    let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Err(DetectError::InsufficientData(
            "no numeric speech-rate samples".to_string(),
        ));
    }

    let avg_wpm = finite.iter().sum::<f64>() / finite.len() as f64;

    let (detected, confidence, reason) = if avg_wpm < config.low_wpm {
        (false, config.low_confidence, ReasonCode::NormalRate)
    } else if avg_wpm < config.high_wpm {
        (true, config.band_confidence, ReasonCode::ElevatedRate)
    } else {
        let detected = config.high_rate_policy == HighRatePolicy::Detect;
        (detected, config.high_confidence, ReasonCode::VeryHighRate)
    };

    info!(
        behavior = "rapid_talking",
        avg_wpm,
        samples = finite.len(),
        detected,
        confidence,
        "speech rate classified"
    );

    Ok(DetectionResult::new(detected, confidence)
        .with_reason(reason)
        .with_details(BehaviorDetails::Speech(SpeechDetails {
            avg_wpm: round2(avg_wpm),
            samples: finite.len(),
        })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normal_rate() {
        let result = detect_rapid_talking(&[120.0, 130.0, 125.0], &SpeechConfig::default()).unwrap();
        assert!(!result.detected);
        assert_eq!(result.confidence, 0.1);
        assert_eq!(result.reason, Some(ReasonCode::NormalRate));
    }

    #[test]
    fn test_elevated_rate() {
        let result = detect_rapid_talking(&[180.0, 190.0], &SpeechConfig::default()).unwrap();
        assert!(result.detected);
        assert_eq!(result.confidence, 0.5);
        match result.details {
            Some(BehaviorDetails::Speech(details)) => assert_eq!(details.avg_wpm, 185.0),
            other => panic!("expected speech details, got {other:?}"),
        }
    }

    #[test]
    fn test_band_edges() {
        let config = SpeechConfig::default();
        assert!(detect_rapid_talking(&[150.0], &config).unwrap().detected);
        assert!(!detect_rapid_talking(&[149.99], &config).unwrap().detected);
    }

    #[test]
    fn test_very_high_rate_policy() {
        let detect = detect_rapid_talking(&[210.0, 230.0], &SpeechConfig::default()).unwrap();
        assert!(detect.detected);
        assert_eq!(detect.confidence, 1.0);

        let config = SpeechConfig {
            high_rate_policy: HighRatePolicy::Reject,
            ..SpeechConfig::default()
        };
        let reject = detect_rapid_talking(&[200.0], &config).unwrap();
        assert!(!reject.detected);
        assert_eq!(reject.reason, Some(ReasonCode::VeryHighRate));
    }

    #[test]
    fn test_empty_is_insufficient_data() {
        let err = detect_rapid_talking(&[f64::NAN], &SpeechConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "insufficient_data");
    }
}
