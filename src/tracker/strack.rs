//! Single object track (STrack) and its lifecycle.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::tracker::detection::Detection;
use crate::tracker::kalman_filter::{BoxEncoding, CameraMotion, KalmanFilter};
use crate::tracker::rect::Rect;
use crate::tracker::track_id::TrackIdCounter;
use crate::tracker::track_state::TrackState;

/// Single object track.
#[derive(Debug, Clone)]
pub struct STrack {
    /// Unique track identifier, 0 until activation
    pub track_id: u64,
    pub state: TrackState,
    /// Whether the track has been confirmed
    pub is_activated: bool,
    /// Latest detection confidence
    pub score: f32,
    pub class_id: usize,
    /// Row of the detection matched in the most recent update
    pub det_index: Option<usize>,
    /// Frame of the last successful match
    pub frame_id: u32,
    pub start_frame: u32,
    /// Number of successful updates since activation
    pub tracklet_len: u32,
    /// Predictions since the last successful match
    pub time_since_update: u32,
    /// Detection box this track was built from (TLWH)
    pub tlwh: Rect,
    mean: Option<Array1<f64>>,
    covariance: Option<Array2<f64>>,
    encoding: BoxEncoding,
    curr_feat: Option<Vec<f32>>,
    smooth_feat: Option<Vec<f32>>,
    feature_alpha: f32,
}

/// What a caller gets back for each active track in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub track_id: u64,
    pub rect: Rect,
    pub class_id: usize,
    pub score: f32,
    pub det_index: Option<usize>,
    pub frames_since_update: u32,
}

impl STrack {
    /// Candidate track from a bare box.
    pub fn new(tlwh: Rect, score: f32) -> Self {
        Self {
            track_id: 0,
            state: TrackState::New,
            is_activated: false,
            score,
            class_id: 0,
            det_index: None,
            frame_id: 0,
            start_frame: 0,
            tracklet_len: 0,
            time_since_update: 0,
            tlwh,
            mean: None,
            covariance: None,
            encoding: BoxEncoding::default(),
            curr_feat: None,
            smooth_feat: None,
            feature_alpha: 0.9,
        }
    }

    /// Candidate track from a detection, carrying its class and appearance feature.
    pub fn from_detection(det: &Detection, det_index: usize, feature_alpha: f32) -> Self {
        let mut track = Self::new(det.bbox, det.score);
        track.class_id = det.class_id;
        track.det_index = Some(det_index);
        track.feature_alpha = feature_alpha;
        if let Some(feat) = det.embedding.as_deref().filter(|f| !f.is_empty()) {
            track.update_features(feat);
        }
        track
    }

    /// Current box: the filter estimate once activated, the detection box before.
    pub fn tlwh(&self) -> Rect {
        match &self.mean {
            Some(mean) => self.encoding.decode(mean),
            None => self.tlwh,
        }
    }

    pub fn rect(&self) -> Rect {
        self.tlwh()
    }

    pub fn end_frame(&self) -> u32 {
        self.frame_id
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn covariance(&self) -> Option<&Array2<f64>> {
        self.covariance.as_ref()
    }

    pub fn has_embedding(&self) -> bool {
        self.smooth_feat.is_some()
    }

    /// Exponentially smoothed, unit-length appearance feature.
    pub fn smooth_feature(&self) -> Option<&[f32]> {
        self.smooth_feat.as_deref()
    }

    /// Latest unit-length appearance feature.
    pub fn current_feature(&self) -> Option<&[f32]> {
        self.curr_feat.as_deref()
    }

    fn update_features(&mut self, feat: &[f32]) {
        let feat = normalized(feat);
        self.smooth_feat = Some(match self.smooth_feat.take() {
            Some(smooth) if smooth.len() == feat.len() => {
                let alpha = self.feature_alpha;
                let blended: Vec<f32> = smooth
                    .iter()
                    .zip(&feat)
                    .map(|(s, f)| alpha * s + (1.0 - alpha) * f)
                    .collect();
                normalized(&blended)
            }
            _ => feat.clone(),
        });
        self.curr_feat = Some(feat);
    }

    fn expect_state(&self, allowed: &[TrackState], operation: &'static str) -> Result<(), TrackError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TrackError::InvalidTransition {
                track_id: self.track_id,
                state: self.state,
                operation,
            })
        }
    }

    /// New -> Tracked. Consumes an identity from `ids`.
    pub fn activate(
        &mut self,
        kalman_filter: &KalmanFilter,
        frame_id: u32,
        ids: &TrackIdCounter,
    ) -> Result<(), TrackError> {
        self.expect_state(&[TrackState::New], "activate")?;

        self.encoding = kalman_filter.encoding();
        let (mean, covariance) = kalman_filter.initiate(self.encoding.encode(&self.tlwh));
        self.mean = Some(mean);
        self.covariance = Some(covariance);

        self.track_id = ids.next_id();
        self.tracklet_len = 0;
        self.time_since_update = 0;
        self.state = TrackState::Tracked;
        // Only tracks born on the very first frame skip the tentative phase.
        self.is_activated = frame_id == 1;
        self.frame_id = frame_id;
        self.start_frame = frame_id;
        Ok(())
    }

    fn correct(&mut self, new_track: &STrack, kalman_filter: &KalmanFilter) -> Result<(), TrackError> {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let measurement = self.encoding.encode(&new_track.tlwh);
            let (new_mean, new_cov) = kalman_filter.update(mean, cov, measurement)?;
            self.mean = Some(new_mean);
            self.covariance = Some(new_cov);
        }
        self.time_since_update = 0;
        self.state = TrackState::Tracked;
        self.is_activated = true;
        self.score = new_track.score;
        self.class_id = new_track.class_id;
        self.det_index = new_track.det_index;
        if let Some(feat) = new_track.curr_feat.as_deref() {
            self.update_features(feat);
        }
        Ok(())
    }

    /// Lost -> Tracked, keeping the identity.
    pub fn re_activate(
        &mut self,
        new_track: &STrack,
        kalman_filter: &KalmanFilter,
        frame_id: u32,
    ) -> Result<(), TrackError> {
        self.expect_state(&[TrackState::Lost, TrackState::Tracked], "re-activate")?;
        self.correct(new_track, kalman_filter)?;
        self.tracklet_len = 0;
        self.frame_id = frame_id;
        Ok(())
    }

    /// Tracked -> Tracked correction with a matched detection.
    pub fn update(
        &mut self,
        new_track: &STrack,
        kalman_filter: &KalmanFilter,
        frame_id: u32,
    ) -> Result<(), TrackError> {
        self.expect_state(&[TrackState::Tracked], "update")?;
        self.correct(new_track, kalman_filter)?;
        self.tracklet_len += 1;
        self.frame_id = frame_id;
        Ok(())
    }

    /// Advance the motion estimate one frame. Tracks that are not being
    /// followed have their size velocity frozen.
    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let mut mean_to_predict = mean.clone();
            if self.state != TrackState::Tracked {
                if self.encoding == BoxEncoding::Xywh {
                    mean_to_predict[6] = 0.0;
                }
                mean_to_predict[7] = 0.0;
            }
            let (new_mean, new_cov) = kalman_filter.predict(&mean_to_predict, cov);
            self.mean = Some(new_mean);
            self.covariance = Some(new_cov);
        }
        self.time_since_update += 1;
    }

    pub fn apply_camera_motion(&mut self, kalman_filter: &KalmanFilter, warp: &CameraMotion) {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let (new_mean, new_cov) = kalman_filter.apply_camera_motion(mean, cov, warp);
            self.mean = Some(new_mean);
            self.covariance = Some(new_cov);
        }
    }

    /// Tracked -> Lost. Removed stays removed.
    pub fn mark_lost(&mut self) {
        if self.state != TrackState::Removed {
            self.state = TrackState::Lost;
        }
    }

    pub fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }

    pub fn multi_predict(stracks: &mut [STrack], kalman_filter: &KalmanFilter) {
        for strack in stracks.iter_mut() {
            strack.predict(kalman_filter);
        }
    }

    pub fn to_object(&self) -> TrackedObject {
        TrackedObject {
            track_id: self.track_id,
            rect: self.tlwh(),
            class_id: self.class_id,
            score: self.score,
            det_index: self.det_index,
            frames_since_update: self.time_since_update,
        }
    }
}

fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn activated(frame_id: u32, ids: &TrackIdCounter) -> (STrack, KalmanFilter) {
        let kf = KalmanFilter::default();
        let mut track = STrack::new(Rect::new(10.0, 10.0, 40.0, 40.0), 0.9);
        track.activate(&kf, frame_id, ids).unwrap();
        (track, kf)
    }

    #[test]
    fn test_new_track_defaults() {
        let track = STrack::new(Rect::new(0.0, 0.0, 5.0, 5.0), 0.7);
        assert_eq!(track.track_id, 0);
        assert_eq!(track.state, TrackState::New);
        assert!(!track.is_activated);
        assert!(!track.has_embedding());
        assert_eq!(track.tlwh(), Rect::new(0.0, 0.0, 5.0, 5.0));
    }

    #[test]
    fn test_activate_assigns_identity() {
        let ids = TrackIdCounter::new();
        let (track, _) = activated(1, &ids);
        assert_eq!(track.track_id, 1);
        assert_eq!(track.state, TrackState::Tracked);
        assert!(track.is_activated);
        assert_eq!(track.start_frame, 1);

        let (later, _) = activated(5, &ids);
        assert_eq!(later.track_id, 2);
        assert!(!later.is_activated);
    }

    #[test]
    fn test_activate_twice_is_rejected() {
        let ids = TrackIdCounter::new();
        let (mut track, kf) = activated(1, &ids);
        assert!(matches!(
            track.activate(&kf, 2, &ids),
            Err(TrackError::InvalidTransition { .. })
        ));
        assert_eq!(ids.current(), 1);
    }

    #[test]
    fn test_update_resets_frames_since_match() {
        let ids = TrackIdCounter::new();
        let (mut track, kf) = activated(1, &ids);
        track.predict(&kf);
        track.predict(&kf);
        assert_eq!(track.time_since_update, 2);

        let det = STrack::new(Rect::new(12.0, 10.0, 40.0, 40.0), 0.8);
        track.update(&det, &kf, 3).unwrap();
        assert_eq!(track.time_since_update, 0);
        assert_eq!(track.frame_id, 3);
        assert_eq!(track.tracklet_len, 1);
        assert_eq!(track.score, 0.8);
    }

    #[test]
    fn test_lost_then_re_activate_keeps_identity() {
        let ids = TrackIdCounter::new();
        let (mut track, kf) = activated(1, &ids);
        track.mark_lost();
        assert_eq!(track.state, TrackState::Lost);
        let snapshot = track.clone();
        assert!(track.update(&snapshot, &kf, 2).is_err());

        let det = STrack::new(Rect::new(11.0, 11.0, 40.0, 40.0), 0.9);
        track.re_activate(&det, &kf, 4).unwrap();
        assert_eq!(track.state, TrackState::Tracked);
        assert_eq!(track.track_id, 1);
        assert_eq!(track.frame_id, 4);
    }

    #[test]
    fn test_removed_track_cannot_be_resurrected() {
        let ids = TrackIdCounter::new();
        let (mut track, kf) = activated(1, &ids);
        track.mark_removed();
        track.mark_lost();
        assert_eq!(track.state, TrackState::Removed);

        let det = STrack::new(Rect::new(10.0, 10.0, 40.0, 40.0), 0.9);
        assert!(matches!(
            track.update(&det, &kf, 2),
            Err(TrackError::InvalidTransition { operation: "update", .. })
        ));
        assert!(track.re_activate(&det, &kf, 2).is_err());
        assert_eq!(track.state, TrackState::Removed);
    }

    #[test]
    fn test_feature_smoothing() {
        let det = Detection::new(0.0, 0.0, 10.0, 10.0, 0.9).with_embedding(vec![2.0, 0.0]);
        let mut track = STrack::from_detection(&det, 0, 0.9);
        assert_eq!(track.smooth_feature(), Some(&[1.0, 0.0][..]));

        let ids = TrackIdCounter::new();
        let kf = KalmanFilter::default();
        track.activate(&kf, 1, &ids).unwrap();

        let next = Detection::new(0.0, 0.0, 10.0, 10.0, 0.9).with_embedding(vec![0.0, 3.0]);
        track
            .update(&STrack::from_detection(&next, 0, 0.9), &kf, 2)
            .unwrap();
        let smooth = track.smooth_feature().unwrap();
        let norm = (smooth[0] * smooth[0] + smooth[1] * smooth[1]).sqrt();
        assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-6);
        assert!(smooth[0] > smooth[1]);
        assert_eq!(track.current_feature(), Some(&[0.0, 1.0][..]));
    }

    #[test]
    fn test_to_object() {
        let ids = TrackIdCounter::new();
        let (track, _) = activated(1, &ids);
        let obj = track.to_object();
        assert_eq!(obj.track_id, 1);
        assert_abs_diff_eq!(obj.rect.x, 10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(obj.rect.width, 40.0, epsilon = 1e-4);
        assert_eq!(obj.frames_since_update, 0);
    }
}
