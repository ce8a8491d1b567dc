//! Sit/stand state machine
//!
//! Turns a per-call posture estimate into a debounced action. Three guards
//! stand between a changed estimate and a reported action: a cooldown since
//! the last confirmed transition, a minimum stability count in the old
//! posture, and a high confidence bar for the new one.

use crate::config::PostureConfig;
use crate::types::{Posture, PostureAction, PostureState, ReasonCode};
use chrono::{DateTime, Utc};

use super::estimate::PostureEstimate;

/// What a step did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// First observation seeded the state
    Baseline,
    /// Same posture as stored; stability grew
    Maintained,
    /// Change blocked by the cooldown; state untouched
    Cooldown { remaining_seconds: f64 },
    /// Old posture was not settled; the new one starts counting
    Unstable,
    /// Change not trusted enough; state untouched
    LowConfidence,
    /// Confirmed action
    Confirmed(PostureAction),
}

impl Transition {
    pub fn reason(&self) -> ReasonCode {
        match self {
            Transition::Baseline => ReasonCode::BaselineEstablished,
            Transition::Maintained => ReasonCode::MaintainingPosture,
            Transition::Cooldown { .. } => ReasonCode::CooldownActive,
            Transition::Unstable => ReasonCode::InsufficientStability,
            Transition::LowConfidence => ReasonCode::ConfidenceTooLow,
            Transition::Confirmed(_) => ReasonCode::ActionDetected,
        }
    }

    pub fn action(&self) -> Option<PostureAction> {
        match self {
            Transition::Confirmed(action) => Some(*action),
            _ => None,
        }
    }
}

/// Apply one estimate to the stored state
///
/// Returns the transition and whether `state` was modified.
pub fn step(
    state: &mut PostureState,
    estimate: &PostureEstimate,
    now: DateTime<Utc>,
    config: &PostureConfig,
) -> (Transition, bool) {
    if state.posture == Posture::Unknown {
        *state = PostureState {
            posture: estimate.posture,
            stability_count: 1,
            last_transition_time: now,
        };
        return (Transition::Baseline, true);
    }

    if estimate.posture == state.posture {
        state.stability_count = state.stability_count.saturating_add(1);
        return (Transition::Maintained, true);
    }

    let elapsed = (now - state.last_transition_time).num_milliseconds() as f64 / 1000.0;
    if elapsed < config.cooldown_seconds {
        return (
            Transition::Cooldown {
                remaining_seconds: config.cooldown_seconds - elapsed,
            },
            false,
        );
    }

    if state.stability_count < config.min_stability {
        state.posture = estimate.posture;
        state.stability_count = 1;
        return (Transition::Unstable, true);
    }

    if estimate.confidence < config.min_transition_confidence {
        return (Transition::LowConfidence, false);
    }

    let Some(action) = PostureAction::towards(estimate.posture) else {
        return (Transition::LowConfidence, false);
    };
    *state = PostureState {
        posture: estimate.posture,
        stability_count: 1,
        last_transition_time: now,
    };
    (Transition::Confirmed(action), true)
}
