//! Tracker configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::tracker::kalman_filter::BoxEncoding;

/// Association flavour of a tracker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    /// IoU-only association over an aspect-ratio motion model.
    #[default]
    ByteTrack,
    /// ByteTrack plus appearance fusion and camera motion compensation,
    /// over a width/height motion model.
    BotSort,
}

impl TrackerKind {
    pub fn box_encoding(self) -> BoxEncoding {
        match self {
            TrackerKind::ByteTrack => BoxEncoding::Xyah,
            TrackerKind::BotSort => BoxEncoding::Xywh,
        }
    }
}

impl FromStr for TrackerKind {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bytetrack" => Ok(TrackerKind::ByteTrack),
            "botsort" => Ok(TrackerKind::BotSort),
            other => Err(TrackError::UnknownTracker(other.to_string())),
        }
    }
}

/// How the appearance cost is folded into the IoU cost.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum AppearanceFusion {
    /// Element-wise minimum of the two matrices.
    #[default]
    Min,
    /// `iou_weight * iou + (1 - iou_weight) * appearance`.
    Weighted { iou_weight: f32 },
}

/// Configuration for the BYTETracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub tracker_type: TrackerKind,
    /// Confidence floor for the first association pass.
    pub track_high_thresh: f32,
    /// Confidence floor for the low-confidence recovery pass.
    pub track_low_thresh: f32,
    /// Confidence floor to start a new identity.
    pub new_track_thresh: f32,
    /// Frames (at 30 fps) a lost track survives before removal.
    pub track_buffer: u32,
    pub frame_rate: f32,
    /// Cost acceptance threshold of the first pass.
    pub match_thresh: f32,
    /// Cost acceptance threshold of the second (lost/pending) pass, pure IoU.
    pub lost_match_thresh: f32,
    /// Cost acceptance threshold of the low-confidence pass, pure IoU.
    pub low_match_thresh: f32,
    /// Cost acceptance threshold for tentative tracks.
    pub unconfirmed_match_thresh: f32,
    /// Fold detection confidence into the IoU cost.
    pub fuse_score: bool,
    /// Fuse appearance embeddings into the first pass (BoT-SORT only).
    pub with_reid: bool,
    /// IoU cost above which the appearance cost is ignored.
    pub proximity_thresh: f32,
    /// Appearance cost above which a pair is considered a mismatch.
    pub appearance_thresh: f32,
    pub appearance_fusion: AppearanceFusion,
    /// Weight of the previous smoothed embedding in the EMA update.
    pub feature_alpha: f32,
    /// Share one identity counter across all streams of a multi-stream tracker.
    pub shared_ids: bool,
    /// How many removed tracks to keep around for inspection.
    pub removed_history: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracker_type: TrackerKind::ByteTrack,
            track_high_thresh: 0.5,
            track_low_thresh: 0.1,
            new_track_thresh: 0.6,
            track_buffer: 30,
            frame_rate: 30.0,
            match_thresh: 0.8,
            lost_match_thresh: 0.9,
            low_match_thresh: 0.5,
            unconfirmed_match_thresh: 0.7,
            fuse_score: true,
            with_reid: false,
            proximity_thresh: 0.5,
            appearance_thresh: 0.25,
            appearance_fusion: AppearanceFusion::Min,
            feature_alpha: 0.9,
            shared_ids: false,
            removed_history: 1000,
        }
    }
}

impl TrackerConfig {
    /// BoT-SORT defaults with appearance fusion switched on.
    pub fn botsort() -> Self {
        Self {
            tracker_type: TrackerKind::BotSort,
            with_reid: true,
            ..Self::default()
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, TrackError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, TrackError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Frames a lost track may stay lost before it is removed.
    pub fn max_time_lost(&self) -> u32 {
        (self.frame_rate / 30.0 * self.track_buffer as f32) as u32
    }

    /// Appearance fusion only applies to BoT-SORT sessions.
    pub fn uses_reid(&self) -> bool {
        self.with_reid && self.tracker_type == TrackerKind::BotSort
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        let unit = [
            ("track_high_thresh", self.track_high_thresh),
            ("track_low_thresh", self.track_low_thresh),
            ("new_track_thresh", self.new_track_thresh),
            ("match_thresh", self.match_thresh),
            ("lost_match_thresh", self.lost_match_thresh),
            ("low_match_thresh", self.low_match_thresh),
            ("unconfirmed_match_thresh", self.unconfirmed_match_thresh),
            ("proximity_thresh", self.proximity_thresh),
            ("appearance_thresh", self.appearance_thresh),
            ("feature_alpha", self.feature_alpha),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(TrackError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if let AppearanceFusion::Weighted { iou_weight } = self.appearance_fusion {
            if !(0.0..=1.0).contains(&iou_weight) {
                return Err(TrackError::InvalidConfig(format!(
                    "appearance_fusion.iou_weight must be within [0, 1], got {iou_weight}"
                )));
            }
        }
        if self.track_low_thresh > self.track_high_thresh {
            return Err(TrackError::InvalidConfig(format!(
                "track_low_thresh ({}) exceeds track_high_thresh ({})",
                self.track_low_thresh, self.track_high_thresh
            )));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(TrackError::InvalidConfig(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        Ok(())
    }
}
