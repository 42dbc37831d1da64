//! Seams between the tracker and the stages around it.
//!
//! Upstream, any inference backend implements [`DetectionSource`] (or hands
//! over raw rows through [`IntoDetections`]); downstream, callers get the
//! [`TrackedObject`](crate::tracker::TrackedObject) list for rendering or export.

mod builder;
mod detector;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{DetectionSource, IntoDetections};
pub use pipeline::{PipelineError, TrackerPipeline};
