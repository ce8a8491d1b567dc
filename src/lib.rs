//! Kinesense - Behavior-signal fusion and posture state engine
//!
//! Kinesense turns short batches of webcam frames, or precomputed numeric
//! sequences, into one debounced detection per call: frame decoding →
//! landmark tracking → motion estimation → multi-method fusion → verdict.
//!
//! ## Behaviors
//!
//! - **Hands / feet tapping**: pixel motion and landmark trajectories must agree
//! - **Sit / stand**: per-call posture vote feeding a persisted state machine
//! - **Eye gaze**: eye-crop sequences classified by a pluggable model
//! - **Rapid talking**: threshold rule over words-per-minute samples

pub mod classifier;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod error;
pub mod estimator;
pub mod fusion;
pub mod gaze;
pub mod logging;
pub mod motion;
pub mod pipeline;
pub mod posture;
pub mod speech;
pub mod tracker;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classifier::{ModelRegistry, ModelStatus, SequenceClassifier};
pub use clock::{Clock, SystemClock};
pub use config::{AppConfig, DetectorConfig};
pub use error::{DetectError, StoreError};
pub use estimator::{LandmarkEstimator, NoopEstimator, PrecomputedEstimator};
pub use pipeline::{analyze_behavior, BatchReport, BehaviorAnalyzer};
pub use posture::{FilePostureStore, MemoryPostureStore, PostureStore};
pub use types::{BehaviorKind, DetectionResult, ReasonCode};

/// Kinesense version reported by the CLI and C ABI
pub const KINESENSE_VERSION: &str = env!("CARGO_PKG_VERSION");
