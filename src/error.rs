use thiserror::Error;

use crate::tracker::TrackState;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown tracker type '{0}', expected 'bytetrack' or 'botsort'")]
    UnknownTracker(String),
    #[error("track {track_id}: cannot {operation} while {state}")]
    InvalidTransition {
        track_id: u64,
        state: TrackState,
        operation: &'static str,
    },
    #[error("numerical error: {0}")]
    Numerical(String),
    #[error("assignment failed: {0}")]
    Assignment(String),
    #[error("stream {stream} out of range ({streams} streams)")]
    UnknownStream { stream: usize, streams: usize },
    #[error("failed to parse tracker configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
