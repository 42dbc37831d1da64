//! Cost matrices and linear assignment for track/detection association.
//!
//! Every cost produced here lies in [0, 1], 0 meaning identical and 1 meaning
//! nothing in common. Rows are tracks, columns are detections.

use ndarray::Array2;
use tracing::trace;

use crate::error::TrackError;
use crate::tracker::config::AppearanceFusion;
use crate::tracker::rect::Rect;

/// Cost used to pad the rectangular problem to a square one.
const PADDING_COST: f64 = 1e6;

/// `1 - IoU` for every track/detection pair. Empty boxes cost 1 against everything.
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
    let mut dists = Array2::zeros((track_boxes.len(), det_boxes.len()));
    for (i, t) in track_boxes.iter().enumerate() {
        for (j, d) in det_boxes.iter().enumerate() {
            dists[[i, j]] = 1.0 - t.iou(d);
        }
    }
    dists
}

/// Cosine distance between appearance features, halved into [0, 1].
///
/// A pair where either side has no feature, or the lengths disagree, costs 1.
pub fn embedding_distance(
    track_features: &[Option<&[f32]>],
    det_features: &[Option<&[f32]>],
) -> Array2<f32> {
    let mut dists = Array2::from_elem((track_features.len(), det_features.len()), 1.0);
    for (i, t) in track_features.iter().enumerate() {
        for (j, d) in det_features.iter().enumerate() {
            if let (Some(t), Some(d)) = (t, d) {
                if let Some(dist) = cosine_distance(t, d) {
                    dists[[i, j]] = (dist / 2.0).clamp(0.0, 1.0);
                }
            }
        }
    }
    dists
}

fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return None;
    }
    Some((1.0 - dot / (na * nb)).clamp(0.0, 2.0))
}

/// Gate an appearance cost matrix and fold it into the motion cost.
///
/// Appearance entries above `appearance_thresh`, or whose raw IoU cost is
/// above `proximity_thresh`, are forced to 1 so a look-alike far away can
/// never win on appearance alone.
pub fn fuse_appearance(
    cost: &mut Array2<f32>,
    raw_iou: &Array2<f32>,
    emb: &Array2<f32>,
    proximity_thresh: f32,
    appearance_thresh: f32,
    policy: AppearanceFusion,
) {
    for ((idx, c), &e) in cost.indexed_iter_mut().zip(emb.iter()) {
        let gated = if e > appearance_thresh || raw_iou[idx] > proximity_thresh {
            1.0
        } else {
            e
        };
        *c = match policy {
            AppearanceFusion::Min => c.min(gated),
            AppearanceFusion::Weighted { iou_weight } => {
                iou_weight * *c + (1.0 - iou_weight) * gated
            }
        }
        .clamp(0.0, 1.0);
    }
}

/// Fold detection confidence into a cost: `1 - (1 - cost) * score`.
///
/// Scores are clamped into [0, 1] first.
pub fn fuse_score(cost_matrix: &mut Array2<f32>, scores: &[f32]) {
    for ((_, j), c) in cost_matrix.indexed_iter_mut() {
        let score = scores[j].clamp(0.0, 1.0);
        *c = (1.0 - (1.0 - *c) * score).clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Minimum-cost one-to-one assignment, keeping only pairs with cost `<= thresh`.
///
/// The rectangular problem is padded to a square one and solved with
/// Jonker-Volgenant, so ties always resolve the same way for the same input.
/// Rejected pairs land in both unmatched lists.
pub fn linear_assignment(
    cost_matrix: &Array2<f32>,
    thresh: f32,
) -> Result<AssignmentResult, TrackError> {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return Ok(AssignmentResult {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        });
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), PADDING_COST);
    for ((i, j), &c) in cost_matrix.indexed_iter() {
        padded[[i, j]] = c as f64;
    }

    let (row_to_col, _) =
        lapjv::lapjv(&padded).map_err(|e| TrackError::Assignment(format!("{e:?}")))?;

    let mut result = AssignmentResult::default();
    let mut col_matched = vec![false; num_cols];
    for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
        if col < num_cols && cost_matrix[[row, col]] <= thresh {
            result.matches.push((row, col));
            col_matched[col] = true;
        } else {
            result.unmatched_tracks.push(row);
        }
    }
    result.unmatched_detections = col_matched
        .iter()
        .enumerate()
        .filter_map(|(j, &m)| (!m).then_some(j))
        .collect();

    trace!(
        rows = num_rows,
        cols = num_cols,
        thresh,
        matched = result.matches.len(),
        "linear assignment"
    );
    Ok(result)
}
