//! Sit/stand detection
//!
//! Pipeline stages:
//! 1. Full-body gate over the recent window of poses
//! 2. Per-call posture estimate by weighted frame vote
//! 3. State machine step inside one store transaction

pub mod estimate;
pub mod machine;
pub mod store;

pub use estimate::{classify_frame, estimate_posture, FramePosture, PostureEstimate};
pub use machine::{step, Transition};
pub use store::{FilePostureStore, MemoryPostureStore, PostureRecord, PostureStore};

use crate::clock::Clock;
use crate::config::PostureConfig;
use crate::error::DetectError;
use crate::tracker::posture_gate;
use crate::types::{
    round_confidence, BehaviorDetails, DetectionResult, LandmarkSet, PostureDetails,
    PostureState,
};
use tracing::{info, warn};

/// Detect a sit-to-stand or stand-to-sit action from a pose sequence
pub fn detect_sit_stand(
    poses: &[LandmarkSet],
    store: &dyn PostureStore,
    clock: &dyn Clock,
    config: &PostureConfig,
) -> Result<DetectionResult, DetectError> {
    let window = &poses[poses.len().saturating_sub(config.analysis_window)..];

    // Stage 1: Partial-body shots never produce a verdict
    if let Err(reason) = posture_gate(window, config) {
        info!(behavior = "sit_stand", ?reason, poses = poses.len(), "posture gate failed");
        return Ok(DetectionResult::rejected(reason));
    }

    // Stage 2: Estimate; no consensus means no state mutation
    let estimate = match estimate_posture(window, config) {
        Ok(estimate) => estimate,
        Err(reason) => {
            info!(behavior = "sit_stand", ?reason, "no posture estimate");
            return Ok(DetectionResult::rejected(reason));
        }
    };

    // Stage 3: Step the state machine atomically; an unusable store is no prior state
    let now = clock.now();
    let mut previous = PostureState::default();
    let mut transition = None;
    let mut apply = |state: &mut PostureState| {
        previous = *state;
        let (t, changed) = step(state, &estimate, now, config);
        transition = Some(t);
        changed
    };
    let stepped = store.read_modify_write(&mut apply);
    let (state, store_error) = match stepped {
        Ok(state) => (state, None),
        Err(e) => {
            warn!(
                behavior = "sit_stand",
                error = %e,
                "posture store unavailable, stepping from no prior state"
            );
            let mut state = PostureState::default();
            apply(&mut state);
            (state, Some(DetectError::from(e)))
        }
    };
    let transition = transition.ok_or_else(|| {
        DetectError::Internal("posture transaction did not run".to_string())
    })?;

    info!(
        behavior = "sit_stand",
        estimate = %estimate.posture,
        confidence = estimate.confidence,
        previous = %previous.posture,
        stability = state.stability_count,
        ?transition,
        "posture step complete"
    );

    let details = BehaviorDetails::Posture(PostureDetails {
        current_posture: estimate.posture,
        previous_posture: previous.posture,
        stability_count: state.stability_count,
        action: transition.action(),
        posture_confidence: round_confidence(estimate.confidence),
        valid_frames: estimate.valid_frames,
        cooldown_remaining_seconds: match transition {
            Transition::Cooldown { remaining_seconds } => Some(crate::types::round2(remaining_seconds)),
            _ => None,
        },
    });

    let result = match transition.action() {
        Some(_) => DetectionResult::new(true, estimate.confidence),
        None => DetectionResult::new(false, 0.0),
    };
    let result = result.with_reason(transition.reason()).with_details(details);
    Ok(match store_error {
        Some(e) => result.with_error(e.kind()),
        None => result,
    })
}

#[cfg(test)]
mod tests {
    use super::estimate::tests::{sitting_pose, standing_pose};
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::types::{Posture, PostureAction, ReasonCode};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap())
    }

    fn posture_of(result: &DetectionResult) -> &PostureDetails {
        match &result.details {
            Some(BehaviorDetails::Posture(details)) => details,
            other => panic!("expected posture details, got {other:?}"),
        }
    }

    #[test]
    fn test_first_call_establishes_baseline() {
        let store = MemoryPostureStore::new();
        let clock = clock();
        let config = PostureConfig::default();

        let result = detect_sit_stand(&vec![sitting_pose(); 8], &store, &clock, &config).unwrap();

        assert!(!result.detected);
        assert_eq!(result.reason, Some(ReasonCode::BaselineEstablished));
        let state = store.load().unwrap();
        assert_eq!(state.posture, Posture::Sitting);
        assert_eq!(state.stability_count, 1);
    }

    #[test]
    fn test_full_sit_to_stand_cycle() {
        let store = MemoryPostureStore::new();
        let clock = clock();
        let config = PostureConfig::default();
        let sitting = vec![sitting_pose(); 8];
        let standing = vec![standing_pose(); 8];

        for _ in 0..5 {
            let result = detect_sit_stand(&sitting, &store, &clock, &config).unwrap();
            assert!(!result.detected);
            clock.advance_secs(5);
        }
        assert_eq!(store.load().unwrap().stability_count, 5);

        let result = detect_sit_stand(&standing, &store, &clock, &config).unwrap();
        assert!(result.detected);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.reason, Some(ReasonCode::ActionDetected));
        let details = posture_of(&result);
        assert_eq!(details.action, Some(PostureAction::StandingUp));
        assert_eq!(details.previous_posture, Posture::Sitting);
        assert_eq!(details.current_posture, Posture::Standing);

        // Sitting straight back down is inside the cooldown
        clock.advance_secs(3);
        let result = detect_sit_stand(&sitting, &store, &clock, &config).unwrap();
        assert!(!result.detected);
        assert_eq!(result.reason, Some(ReasonCode::CooldownActive));
        assert_eq!(posture_of(&result).cooldown_remaining_seconds, Some(12.0));
        assert_eq!(store.load().unwrap().posture, Posture::Standing);
    }

    #[test]
    fn test_gate_failure_does_not_touch_state() {
        let store = MemoryPostureStore::new();
        let config = PostureConfig::default();
        let close_up = crate::tracker::tests::pose(0.1, 0.5, 0.7, 0.75, 0.8, 0.9);

        let result = detect_sit_stand(&vec![close_up; 8], &store, &clock(), &config).unwrap();
        assert!(!result.detected);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.reason, Some(ReasonCode::BodySpanTooSmall));
        assert_eq!(store.load().unwrap(), PostureState::default());
    }

    struct BrokenStore;

    impl PostureStore for BrokenStore {
        fn load(&self) -> Result<PostureState, StoreError> {
            Err(StoreError::Lock("read-only volume".to_string()))
        }

        fn read_modify_write(
            &self,
            _apply: &mut dyn FnMut(&mut PostureState) -> bool,
        ) -> Result<PostureState, StoreError> {
            Err(StoreError::Lock("read-only volume".to_string()))
        }
    }

    #[test]
    fn test_store_failure_steps_from_no_prior_state() {
        let result = detect_sit_stand(
            &vec![sitting_pose(); 8],
            &BrokenStore,
            &clock(),
            &PostureConfig::default(),
        )
        .unwrap();

        assert!(!result.detected);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.reason, Some(ReasonCode::BaselineEstablished));
        assert_eq!(result.error.as_deref(), Some("state_store"));
        let details = posture_of(&result);
        assert_eq!(details.previous_posture, Posture::Unknown);
        assert_eq!(details.current_posture, Posture::Sitting);
        assert_eq!(details.stability_count, 1);
    }
}
