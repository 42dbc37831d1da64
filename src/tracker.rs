mod byte_tracker;
mod config;
mod detection;
mod kalman_filter;
mod matching;
mod multi_stream;
mod rect;
mod strack;
mod track_id;
mod track_state;

pub use byte_tracker::{BYTETracker, remove_duplicate_stracks};
pub use config::{AppearanceFusion, TrackerConfig, TrackerKind};
pub use detection::Detection;
pub use kalman_filter::{BoxEncoding, CameraMotion, KalmanFilter};
pub use matching::{
    AssignmentResult, embedding_distance, fuse_appearance, fuse_score, iou_distance,
    linear_assignment,
};
pub use multi_stream::MultiStreamTracker;
pub use rect::{Rect, iou_batch};
pub use strack::{STrack, TrackedObject};
pub use track_id::TrackIdCounter;
pub use track_state::TrackState;
