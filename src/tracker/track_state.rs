use std::fmt;

use serde::{Deserialize, Serialize};

/// Track state enumeration for object tracking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrackState {
    /// Candidate built from a detection, not yet activated
    #[default]
    New,
    /// Actively tracked object
    Tracked,
    /// Missed at least one frame, still inside the lost budget
    Lost,
    /// Terminal; the identity is never handed out again
    Removed,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackState::New => "new",
            TrackState::Tracked => "tracked",
            TrackState::Lost => "lost",
            TrackState::Removed => "removed",
        };
        f.write_str(name)
    }
}
