//! Main BYTETracker algorithm implementation.
//!
//! One `BYTETracker` is one tracking session over a single video stream. Each
//! call to [`BYTETracker::update`] processes the next frame:
//!
//! 1. predict every tracked and lost track forward one frame;
//! 2. split detections into high- and low-confidence sets;
//! 3. match confirmed tracks against high-confidence detections;
//! 4. match the leftovers plus lost tracks against what is left, on IoU alone;
//! 5. let still-unmatched tracked tracks recover low-confidence detections;
//! 6. give tentative tracks one chance to confirm, drop them otherwise;
//! 7. start new tracks and retire lost tracks past their budget.

use std::mem;

use ndarray::Array2;
use tracing::{debug, trace};

use crate::error::TrackError;
use crate::tracker::config::TrackerConfig;
use crate::tracker::detection::{Detection, sanitize};
use crate::tracker::kalman_filter::{CameraMotion, KalmanFilter};
use crate::tracker::matching::{self, AssignmentResult};
use crate::tracker::rect::{Rect, iou_batch};
use crate::tracker::strack::{STrack, TrackedObject};
use crate::tracker::track_id::TrackIdCounter;
use crate::tracker::track_state::TrackState;

/// IoU above which a tracked and a lost track are considered the same object.
const DUPLICATE_IOU: f32 = 0.85;

/// The association passes run each frame, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Confirmed,
    Rematch,
    LowScore,
    Tentative,
}

impl Pass {
    fn name(self) -> &'static str {
        match self {
            Pass::Confirmed => "confirmed",
            Pass::Rematch => "rematch",
            Pass::LowScore => "low-score",
            Pass::Tentative => "tentative",
        }
    }
}

pub struct BYTETracker {
    tracked_stracks: Vec<STrack>,
    lost_stracks: Vec<STrack>,
    removed_stracks: Vec<STrack>,
    frame_id: u32,
    config: TrackerConfig,
    max_time_lost: u32,
    kalman_filter: KalmanFilter,
    ids: TrackIdCounter,
}

impl BYTETracker {
    /// New session with its own identity counter.
    pub fn new(config: TrackerConfig) -> Result<Self, TrackError> {
        Self::with_id_counter(config, TrackIdCounter::new())
    }

    /// New session drawing identities from `ids`, which may be shared.
    pub fn with_id_counter(config: TrackerConfig, ids: TrackIdCounter) -> Result<Self, TrackError> {
        config.validate()?;
        let max_time_lost = config.max_time_lost();
        let kalman_filter = KalmanFilter::new(config.tracker_type.box_encoding());
        Ok(Self {
            tracked_stracks: Vec::new(),
            lost_stracks: Vec::new(),
            removed_stracks: Vec::new(),
            frame_id: 0,
            config,
            max_time_lost,
            kalman_filter,
            ids,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn id_counter(&self) -> &TrackIdCounter {
        &self.ids
    }

    /// Tracks in the Tracked state, confirmed or tentative.
    pub fn tracked_stracks(&self) -> &[STrack] {
        &self.tracked_stracks
    }

    pub fn lost_stracks(&self) -> &[STrack] {
        &self.lost_stracks
    }

    /// Most recently removed tracks, oldest first.
    pub fn removed_stracks(&self) -> &[STrack] {
        &self.removed_stracks
    }

    /// Process the next frame and return its confirmed tracks, sorted by id.
    pub fn update(&mut self, detections: Vec<Detection>) -> Result<Vec<TrackedObject>, TrackError> {
        self.step(detections, None)
    }

    /// Like [`update`](Self::update), after warping every track by the
    /// camera motion between the previous and the current frame.
    pub fn update_with_camera_motion(
        &mut self,
        detections: Vec<Detection>,
        warp: &CameraMotion,
    ) -> Result<Vec<TrackedObject>, TrackError> {
        self.step(detections, Some(warp))
    }

    /// Start over for a new stream: pools, frame counter and identities.
    pub fn reset(&mut self) {
        self.tracked_stracks.clear();
        self.lost_stracks.clear();
        self.removed_stracks.clear();
        self.frame_id = 0;
        self.ids.reset();
        debug!("tracker reset");
    }

    /// End the session, removing every active track and returning them.
    pub fn teardown(&mut self) -> Vec<STrack> {
        let mut ended: Vec<STrack> = self
            .tracked_stracks
            .drain(..)
            .chain(self.lost_stracks.drain(..))
            .collect();
        for track in ended.iter_mut() {
            track.mark_removed();
        }
        debug!(frame_id = self.frame_id, removed = ended.len(), "tracker teardown");
        self.removed_stracks.extend(ended.iter().cloned());
        self.trim_removed();
        ended
    }

    fn step(
        &mut self,
        detections: Vec<Detection>,
        warp: Option<&CameraMotion>,
    ) -> Result<Vec<TrackedObject>, TrackError> {
        self.frame_id += 1;
        let frame_id = self.frame_id;
        let alpha = self.config.feature_alpha;

        // Split detections into high-score and low-score
        let mut detections_high = Vec::new();
        let mut detections_low = Vec::new();
        for fd in sanitize(frame_id, detections) {
            let candidate = STrack::from_detection(&fd.det, fd.index, alpha);
            if fd.det.score >= self.config.track_high_thresh {
                detections_high.push(candidate);
            } else if fd.det.score > self.config.track_low_thresh {
                detections_low.push(candidate);
            }
        }

        // Every live track sits in one arena for the frame; passes work on indices.
        let mut pool: Vec<STrack> = mem::take(&mut self.tracked_stracks);
        pool.append(&mut self.lost_stracks);
        STrack::multi_predict(&mut pool, &self.kalman_filter);
        if let Some(warp) = warp {
            for track in pool.iter_mut() {
                track.apply_camera_motion(&self.kalman_filter, warp);
            }
        }

        let mut confirmed = Vec::new();
        let mut tentative = Vec::new();
        let mut lost = Vec::new();
        for (i, track) in pool.iter().enumerate() {
            match track.state {
                TrackState::Tracked if track.is_activated => confirmed.push(i),
                TrackState::Tracked => tentative.push(i),
                _ => lost.push(i),
            }
        }

        let mut high_used = vec![false; detections_high.len()];

        // First association, confirmed tracks with high score detections
        let first = self.associate(
            Pass::Confirmed,
            &mut pool,
            &confirmed,
            &detections_high,
            &unused(&high_used),
            frame_id,
        )?;
        mark_used(&mut high_used, &first);

        // Second association, leftovers and lost tracks on IoU alone
        let mut rematch_rows = first.unmatched_tracks;
        rematch_rows.extend(&lost);
        let second = self.associate(
            Pass::Rematch,
            &mut pool,
            &rematch_rows,
            &detections_high,
            &unused(&high_used),
            frame_id,
        )?;
        mark_used(&mut high_used, &second);

        // Third association, tracked leftovers with low score detections
        let low_rows: Vec<usize> = second
            .unmatched_tracks
            .iter()
            .copied()
            .filter(|&i| pool[i].state == TrackState::Tracked)
            .collect();
        let all_low: Vec<usize> = (0..detections_low.len()).collect();
        let third = self.associate(
            Pass::LowScore,
            &mut pool,
            &low_rows,
            &detections_low,
            &all_low,
            frame_id,
        )?;
        for &i in &third.unmatched_tracks {
            pool[i].mark_lost();
            debug!(frame_id, track_id = pool[i].track_id, "track lost");
        }

        // Tentative tracks, usually tracks with only one beginning frame
        let fourth = self.associate(
            Pass::Tentative,
            &mut pool,
            &tentative,
            &detections_high,
            &unused(&high_used),
            frame_id,
        )?;
        mark_used(&mut high_used, &fourth);
        for &i in &fourth.unmatched_tracks {
            pool[i].mark_removed();
            trace!(frame_id, track_id = pool[i].track_id, "tentative track dropped");
        }

        // Init new stracks
        for (d, mut candidate) in detections_high.into_iter().enumerate() {
            if high_used[d] || candidate.score < self.config.new_track_thresh {
                continue;
            }
            candidate.activate(&self.kalman_filter, frame_id, &self.ids)?;
            debug!(
                frame_id,
                track_id = candidate.track_id,
                score = candidate.score,
                class_id = candidate.class_id,
                "track started"
            );
            pool.push(candidate);
        }

        // Retire lost tracks past their budget
        for track in pool.iter_mut() {
            if track.state == TrackState::Lost && frame_id - track.end_frame() > self.max_time_lost {
                track.mark_removed();
                debug!(frame_id, track_id = track.track_id, "track removed");
            }
        }

        let mut tracked = Vec::new();
        let mut lost_out = Vec::new();
        for track in pool {
            match track.state {
                TrackState::Tracked => tracked.push(track),
                TrackState::Lost => lost_out.push(track),
                _ => self.removed_stracks.push(track),
            }
        }
        let (tracked, lost_out) = remove_duplicate_stracks(tracked, lost_out);
        self.tracked_stracks = tracked;
        self.lost_stracks = lost_out;
        self.trim_removed();

        let mut output: Vec<TrackedObject> = self
            .tracked_stracks
            .iter()
            .filter(|t| t.is_activated)
            .map(STrack::to_object)
            .collect();
        output.sort_by_key(|o| o.track_id);

        debug!(
            frame_id,
            tracked = self.tracked_stracks.len(),
            lost = self.lost_stracks.len(),
            output = output.len(),
            "frame processed"
        );
        Ok(output)
    }

    /// Cost matrix between `pool[rows]` and `dets[cols]` for one pass.
    fn association_cost(
        &self,
        pass: Pass,
        pool: &[STrack],
        rows: &[usize],
        dets: &[STrack],
        cols: &[usize],
    ) -> Array2<f32> {
        let track_rects: Vec<Rect> = rows.iter().map(|&i| pool[i].rect()).collect();
        let det_rects: Vec<Rect> = cols.iter().map(|&j| dets[j].rect()).collect();
        let raw_iou = matching::iou_distance(&track_rects, &det_rects);

        let full = matches!(pass, Pass::Confirmed | Pass::Tentative);
        let mut dists = raw_iou.clone();
        if full && self.config.fuse_score {
            let scores: Vec<f32> = cols.iter().map(|&j| dets[j].score).collect();
            matching::fuse_score(&mut dists, &scores);
        }
        if full && self.config.uses_reid() {
            let track_feats: Vec<Option<&[f32]>> =
                rows.iter().map(|&i| pool[i].smooth_feature()).collect();
            let det_feats: Vec<Option<&[f32]>> =
                cols.iter().map(|&j| dets[j].current_feature()).collect();
            let emb = matching::embedding_distance(&track_feats, &det_feats);
            matching::fuse_appearance(
                &mut dists,
                &raw_iou,
                &emb,
                self.config.proximity_thresh,
                self.config.appearance_thresh,
                self.config.appearance_fusion,
            );
        }
        dists
    }

    fn pass_thresh(&self, pass: Pass) -> f32 {
        match pass {
            Pass::Confirmed => self.config.match_thresh,
            Pass::Rematch => self.config.lost_match_thresh,
            Pass::LowScore => self.config.low_match_thresh,
            Pass::Tentative => self.config.unconfirmed_match_thresh,
        }
    }

    /// Run one association pass and apply its matches to the pool.
    ///
    /// The returned indices are pool indices and detection indices, not
    /// positions within `rows`/`cols`.
    fn associate(
        &self,
        pass: Pass,
        pool: &mut [STrack],
        rows: &[usize],
        dets: &[STrack],
        cols: &[usize],
        frame_id: u32,
    ) -> Result<AssignmentResult, TrackError> {
        let dists = self.association_cost(pass, pool, rows, dets, cols);
        let local = matching::linear_assignment(&dists, self.pass_thresh(pass))?;

        let result = AssignmentResult {
            matches: local
                .matches
                .iter()
                .map(|&(r, c)| (rows[r], cols[c]))
                .collect(),
            unmatched_tracks: local.unmatched_tracks.iter().map(|&r| rows[r]).collect(),
            unmatched_detections: local.unmatched_detections.iter().map(|&c| cols[c]).collect(),
        };

        for &(itracked, idet) in &result.matches {
            let track = &mut pool[itracked];
            let det = &dets[idet];
            if track.state == TrackState::Tracked {
                track.update(det, &self.kalman_filter, frame_id)?;
            } else {
                track.re_activate(det, &self.kalman_filter, frame_id)?;
                debug!(frame_id, track_id = track.track_id, "track re-activated");
            }
        }

        trace!(
            frame_id,
            pass = pass.name(),
            tracks = rows.len(),
            detections = cols.len(),
            matched = result.matches.len(),
            "association pass"
        );
        Ok(result)
    }

    fn trim_removed(&mut self) {
        let cap = self.config.removed_history;
        if self.removed_stracks.len() > cap {
            let excess = self.removed_stracks.len() - cap;
            self.removed_stracks.drain(..excess);
        }
    }
}

fn unused(used: &[bool]) -> Vec<usize> {
    used.iter()
        .enumerate()
        .filter_map(|(i, &u)| (!u).then_some(i))
        .collect()
}

fn mark_used(used: &mut [bool], result: &AssignmentResult) {
    for &(_, d) in &result.matches {
        used[d] = true;
    }
}

/// Drop one of each tracked/lost pair that overlaps almost entirely,
/// keeping whichever has been followed for longer.
pub fn remove_duplicate_stracks(
    stracksa: Vec<STrack>,
    stracksb: Vec<STrack>,
) -> (Vec<STrack>, Vec<STrack>) {
    if stracksa.is_empty() || stracksb.is_empty() {
        return (stracksa, stracksb);
    }

    let a_rects: Vec<Rect> = stracksa.iter().map(|t| t.rect()).collect();
    let b_rects: Vec<Rect> = stracksb.iter().map(|t| t.rect()).collect();
    let ious = iou_batch(&a_rects, &b_rects);

    let mut dupa = vec![false; stracksa.len()];
    let mut dupb = vec![false; stracksb.len()];
    for ((i, j), &iou) in ious.indexed_iter() {
        if iou > DUPLICATE_IOU {
            let time_a = stracksa[i].frame_id - stracksa[i].start_frame;
            let time_b = stracksb[j].frame_id - stracksb[j].start_frame;
            if time_a > time_b {
                dupb[j] = true;
            } else {
                dupa[i] = true;
            }
        }
    }

    let keep = |tracks: Vec<STrack>, dup: &[bool]| -> Vec<STrack> {
        tracks
            .into_iter()
            .zip(dup)
            .filter_map(|(t, &d)| (!d).then_some(t))
            .collect()
    };
    (keep(stracksa, &dupa), keep(stracksb, &dupb))
}
