//! One isolated tracking session per input stream.

use crate::error::TrackError;
use crate::tracker::byte_tracker::BYTETracker;
use crate::tracker::config::TrackerConfig;
use crate::tracker::detection::Detection;
use crate::tracker::kalman_filter::CameraMotion;
use crate::tracker::strack::TrackedObject;
use crate::tracker::track_id::TrackIdCounter;

/// A bank of independent sessions, e.g. one per camera.
///
/// Sessions never share pools. When `shared_ids` is set in the configuration
/// they draw identities from one counter, so a track id is unique across all
/// streams; otherwise every stream counts from 1.
pub struct MultiStreamTracker {
    sessions: Vec<BYTETracker>,
}

impl MultiStreamTracker {
    pub fn new(config: TrackerConfig, streams: usize) -> Result<Self, TrackError> {
        if streams == 0 {
            return Err(TrackError::InvalidConfig(
                "a multi-stream tracker needs at least one stream".to_string(),
            ));
        }
        let shared = config.shared_ids.then(TrackIdCounter::new);
        let sessions = (0..streams)
            .map(|_| {
                let ids = shared.clone().unwrap_or_default();
                BYTETracker::with_id_counter(config.clone(), ids)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sessions })
    }

    pub fn streams(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, stream: usize) -> Result<&BYTETracker, TrackError> {
        let streams = self.sessions.len();
        self.sessions
            .get(stream)
            .ok_or(TrackError::UnknownStream { stream, streams })
    }

    fn session_mut(&mut self, stream: usize) -> Result<&mut BYTETracker, TrackError> {
        let streams = self.sessions.len();
        self.sessions
            .get_mut(stream)
            .ok_or(TrackError::UnknownStream { stream, streams })
    }

    pub fn update(
        &mut self,
        stream: usize,
        detections: Vec<Detection>,
    ) -> Result<Vec<TrackedObject>, TrackError> {
        self.session_mut(stream)?.update(detections)
    }

    pub fn update_with_camera_motion(
        &mut self,
        stream: usize,
        detections: Vec<Detection>,
        warp: &CameraMotion,
    ) -> Result<Vec<TrackedObject>, TrackError> {
        self.session_mut(stream)?
            .update_with_camera_motion(detections, warp)
    }

    /// Reset one stream. With shared identities this also restarts the
    /// shared counter.
    pub fn reset_stream(&mut self, stream: usize) -> Result<(), TrackError> {
        self.session_mut(stream)?.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        for session in self.sessions.iter_mut() {
            session.reset();
        }
    }
}
