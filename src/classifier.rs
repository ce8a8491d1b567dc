//! Sequence classifier seam and model availability
//!
//! Inference is external. The engine owns sequence assembly (stacking
//! fixed-shape per-frame features, minimum-length checks) and hands the
//! finished [`FeatureSequence`] to a [`SequenceClassifier`].
//!
//! [`ModelRegistry`] tracks, per behavior, whether the backing classifier is
//! ready, loadable on first use, or permanently unavailable.

use crate::error::DetectError;
use crate::types::BehaviorKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// A stack of equally sized per-frame feature vectors
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    frame_len: usize,
    data: Vec<f32>,
}

impl FeatureSequence {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            data: Vec::new(),
        }
    }

    /// Append one frame; its length must match the sequence shape
    pub fn push(&mut self, features: &[f32]) -> Result<(), DetectError> {
        if features.len() != self.frame_len {
            return Err(DetectError::Classifier(format!(
                "feature length {} does not match sequence shape {}",
                features.len(),
                self.frame_len
            )));
        }
        self.data.extend_from_slice(features);
        Ok(())
    }

    pub fn len(&self) -> usize {
        if self.frame_len == 0 {
            0
        } else {
            self.data.len() / self.frame_len
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.frame_len)?;
        self.data.get(start..start + self.frame_len)
    }

    pub fn frames(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks(self.frame_len.max(1))
    }
}

/// External classifier over a feature sequence
pub trait SequenceClassifier: Send + Sync {
    /// Class probabilities, one per class, in the classifier's label order
    fn classify(&self, sequence: &FeatureSequence) -> Result<Vec<f64>, DetectError>;

    /// Shortest sequence the classifier accepts
    fn min_sequence_len(&self) -> usize {
        2
    }
}

/// Availability of a behavior's backing classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Ready,
    Loadable,
    Unavailable,
}

/// Builds a classifier on first use
pub type ModelLoader =
    Box<dyn Fn() -> Result<Box<dyn SequenceClassifier>, DetectError> + Send + Sync>;

enum Slot {
    Ready(Arc<dyn SequenceClassifier>),
    Loadable(ModelLoader),
    Unavailable(String),
}

impl Slot {
    fn status(&self) -> ModelStatus {
        match self {
            Slot::Ready(_) => ModelStatus::Ready,
            Slot::Loadable(_) => ModelStatus::Loadable,
            Slot::Unavailable(_) => ModelStatus::Unavailable,
        }
    }
}

/// Whether a behavior is decided by a classifier rather than by rules
pub fn is_classifier_backed(kind: BehaviorKind) -> bool {
    matches!(kind, BehaviorKind::EyeGaze)
}

/// Per-behavior classifier slots with lazy loading
#[derive(Default)]
pub struct ModelRegistry {
    slots: Mutex<HashMap<BehaviorKind, Slot>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_ready(&self, kind: BehaviorKind, classifier: Arc<dyn SequenceClassifier>) {
        self.set(kind, Slot::Ready(classifier));
    }

    pub fn register_loader(&self, kind: BehaviorKind, loader: ModelLoader) {
        self.set(kind, Slot::Loadable(loader));
    }

    pub fn mark_unavailable(&self, kind: BehaviorKind, reason: impl Into<String>) {
        self.set(kind, Slot::Unavailable(reason.into()));
    }

    fn set(&self, kind: BehaviorKind, slot: Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(kind, slot);
    }

    /// Current availability, without triggering a load
    ///
    /// Rule-based behaviors are always ready. A classifier-backed behavior
    /// with nothing registered is unavailable.
    pub fn status(&self, kind: BehaviorKind) -> ModelStatus {
        if !is_classifier_backed(kind) {
            return ModelStatus::Ready;
        }
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(&kind)
            .map(Slot::status)
            .unwrap_or(ModelStatus::Unavailable)
    }

    /// Availability of every behavior, keyed by tag
    pub fn statuses(&self) -> BTreeMap<&'static str, ModelStatus> {
        BehaviorKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str(), self.status(kind)))
            .collect()
    }

    /// Fetch the classifier, loading it on first use
    ///
    /// A failed load marks the slot permanently unavailable.
    pub fn get(&self, kind: BehaviorKind) -> Result<Arc<dyn SequenceClassifier>, DetectError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .remove(&kind)
            .unwrap_or_else(|| Slot::Unavailable("no classifier registered".to_string()));

        let (slot, result) = match slot {
            Slot::Ready(classifier) => (Slot::Ready(classifier.clone()), Ok(classifier)),
            Slot::Unavailable(reason) => {
                let err = DetectError::ModelUnavailable(format!("{kind}: {reason}"));
                (Slot::Unavailable(reason), Err(err))
            }
            Slot::Loadable(loader) => match loader() {
                Ok(classifier) => {
                    info!(behavior = %kind, "classifier loaded");
                    let classifier: Arc<dyn SequenceClassifier> = Arc::from(classifier);
                    (Slot::Ready(classifier.clone()), Ok(classifier))
                }
                Err(e) => {
                    warn!(behavior = %kind, error = %e, "classifier failed to load");
                    let reason = e.to_string();
                    let err = DetectError::ModelUnavailable(format!("{kind}: {reason}"));
                    (Slot::Unavailable(reason), Err(err))
                }
            },
        };

        slots.insert(kind, slot);
        result
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("statuses", &self.statuses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Uniform;

    impl SequenceClassifier for Uniform {
        fn classify(&self, _sequence: &FeatureSequence) -> Result<Vec<f64>, DetectError> {
            Ok(vec![0.2; 5])
        }
    }

    #[test]
    fn test_feature_sequence_shape() {
        let mut seq = FeatureSequence::new(3);
        seq.push(&[1.0, 2.0, 3.0]).unwrap();
        seq.push(&[4.0, 5.0, 6.0]).unwrap();
        assert!(seq.push(&[1.0]).is_err());

        assert_eq!(seq.len(), 2);
        assert_eq!(seq.frame(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(seq.frame(2), None);
        assert_eq!(seq.frames().count(), 2);
    }

    #[test]
    fn test_rule_based_behaviors_are_ready() {
        let registry = ModelRegistry::new();
        let statuses = registry.statuses();

        assert_eq!(statuses["rapid_talking"], ModelStatus::Ready);
        assert_eq!(statuses["sit_stand"], ModelStatus::Ready);
        assert_eq!(statuses["eye_gaze"], ModelStatus::Unavailable);
    }

    #[test]
    fn test_lazy_load_happens_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let registry = ModelRegistry::new();
        registry.register_loader(
            BehaviorKind::EyeGaze,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(Uniform) as Box<dyn SequenceClassifier>)
            }),
        );

        assert_eq!(registry.status(BehaviorKind::EyeGaze), ModelStatus::Loadable);
        assert!(registry.get(BehaviorKind::EyeGaze).is_ok());
        assert!(registry.get(BehaviorKind::EyeGaze).is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status(BehaviorKind::EyeGaze), ModelStatus::Ready);
    }

    #[test]
    fn test_failed_load_is_permanent() {
        let registry = ModelRegistry::new();
        registry.register_loader(
            BehaviorKind::EyeGaze,
            Box::new(|| Err(DetectError::Io(std::io::Error::other("weights missing")))),
        );

        let err = registry.get(BehaviorKind::EyeGaze).err().unwrap();
        assert_eq!(err.kind(), "model_unavailable");
        assert_eq!(
            registry.status(BehaviorKind::EyeGaze),
            ModelStatus::Unavailable
        );
        assert!(registry.get(BehaviorKind::EyeGaze).is_err());
    }
}
