//! Multi-object tracking for per-frame detector output.
//!
//! Detections go in, persistent track identities come out. The core is the
//! [`BYTETracker`] session: Kalman-filtered tracks, IoU (and optionally
//! appearance) cost matrices, and Jonker-Volgenant assignment across several
//! association passes. The [`integration`] module wires a detector into it.

pub mod error;
pub mod integration;
pub mod tracker;

pub use error::TrackError;
pub use integration::{
    DetectionBuilder, DetectionSource, IntoDetections, PipelineError, TrackerPipeline,
};
pub use tracker::{
    BYTETracker, Detection, MultiStreamTracker, Rect, STrack, TrackState, TrackedObject,
    TrackerConfig, TrackerKind,
};
