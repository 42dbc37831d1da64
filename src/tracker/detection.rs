//! Per-frame detector output consumed by the tracker.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::tracker::rect::Rect;

/// Detection input for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box in TLWH storage
    pub bbox: Rect,
    /// Detection confidence score in [0, 1]
    pub score: f32,
    /// Detector class id
    #[serde(default)]
    pub class_id: usize,
    /// Appearance (re-identification) feature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Detection {
    /// Build a detection from TLBR corners (x1, y1, x2, y2).
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self::from_rect(Rect::from_tlbr(x1, y1, x2, y2), score)
    }

    pub fn from_rect(bbox: Rect, score: f32) -> Self {
        Self {
            bbox,
            score,
            class_id: 0,
            embedding: None,
        }
    }

    pub fn with_class(mut self, class_id: usize) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Why this detection must not reach the cost builder, if anything.
    fn defect(&self) -> Option<&'static str> {
        if !self.bbox.is_well_formed() {
            return Some("non-finite or negative box");
        }
        if self.score.is_nan() {
            return Some("NaN confidence");
        }
        if self
            .embedding
            .as_ref()
            .is_some_and(|e| e.iter().any(|v| !v.is_finite()))
        {
            return Some("non-finite embedding");
        }
        None
    }
}

/// A detection that passed sanitation, tagged with its row in the caller's input.
#[derive(Debug, Clone)]
pub(crate) struct FrameDetection {
    pub index: usize,
    pub det: Detection,
}

/// Drops malformed detections for this frame and clamps scores into [0, 1].
pub(crate) fn sanitize(frame_id: u32, detections: Vec<Detection>) -> Vec<FrameDetection> {
    detections
        .into_iter()
        .enumerate()
        .filter_map(|(index, mut det)| {
            if let Some(reason) = det.defect() {
                warn!(frame_id, index, reason, "dropping malformed detection");
                return None;
            }
            if !(0.0..=1.0).contains(&det.score) {
                warn!(frame_id, index, score = det.score, "clamping out-of-range confidence");
                det.score = det.score.clamp(0.0, 1.0);
            }
            Some(FrameDetection { index, det })
        })
        .collect()
}
