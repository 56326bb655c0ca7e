//! Main BYTETracker algorithm implementation.

use std::collections::HashSet;

use crate::rect::{Rect, iou_batch};
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::lifecycle::TrackLifecycle;
use crate::tracker::matching::{self, AssignmentResult};
use crate::tracker::strack::STrack;
use crate::types::{Detection, TrackId};

/// Configuration for the BYTETracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Detections at or above this score take part in the first association
    pub track_thresh: f32,
    pub match_thresh: f32,
    /// Frames a lost track is kept for re-identification, at 30 fps
    pub track_buffer: u32,
    pub frame_rate: f32,
    /// Consecutive associations before a new track is confirmed
    pub confirm_hits: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_thresh: 0.5,
            match_thresh: 0.8,
            track_buffer: 30,
            frame_rate: 30.0,
            confirm_hits: 2,
        }
    }
}

/// ByteTrack multi-object tracker.
///
/// Stateful across calls: `update` must see frames in arrival order, one caller at a time.
pub struct BYTETracker {
    tracked_stracks: Vec<STrack>,
    lost_stracks: Vec<STrack>,
    frame_id: u32,
    next_id: TrackId,
    config: TrackerConfig,
    max_time_lost: u32,
    kalman_filter: KalmanFilter,
}

impl BYTETracker {
    pub fn new(config: TrackerConfig) -> Self {
        let max_time_lost = (config.frame_rate / 30.0 * config.track_buffer as f32) as u32;
        Self {
            tracked_stracks: Vec::new(),
            lost_stracks: Vec::new(),
            frame_id: 0,
            next_id: 0,
            config,
            max_time_lost,
            kalman_filter: KalmanFilter::default(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn allocate_id(&mut self) -> TrackId {
        self.next_id += 1;
        self.next_id
    }

    /// Associate one frame of detections and return every tracked object, confirmed or not.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<STrack> {
        self.frame_id += 1;
        let frame_id = self.frame_id;
        let confirm_hits = self.config.confirm_hits;

        let mut activated_stracks = Vec::new();
        let mut refind_stracks = Vec::new();
        let mut lost_stracks = Vec::new();

        // Step 1: split detections into high-score and low-score
        let (detections_high, detections_low): (Vec<STrack>, Vec<STrack>) = detections
            .iter()
            .filter(|d| d.confidence > 0.1)
            .map(|d| STrack::new(d.bbox, d.confidence))
            .partition(|t| t.score >= self.config.track_thresh);

        let (tracked, unconfirmed): (Vec<STrack>, Vec<STrack>) = self
            .tracked_stracks
            .drain(..)
            .partition(|t| t.is_activated);
        let mut unconfirmed = unconfirmed;

        let mut strack_pool = joint_stracks(tracked, &self.lost_stracks);

        // Step 2: first association, with high score detections
        STrack::multi_predict(&mut strack_pool, &self.kalman_filter);
        let mut dists = matching::iou_distance(&rects(&strack_pool), &rects(&detections_high));
        matching::fuse_score(&mut dists, &scores(&detections_high));

        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = matching::linear_assignment(&dists, self.config.match_thresh);

        for (itracked, idet) in matches {
            let mut track = strack_pool[itracked].clone();
            let det = &detections_high[idet];
            if track.state == TrackLifecycle::Tracked {
                track.update(det, &self.kalman_filter, frame_id, confirm_hits);
                activated_stracks.push(track);
            } else {
                track.re_activate(det, &self.kalman_filter, frame_id);
                refind_stracks.push(track);
            }
        }

        // Step 3: second association, with low score detections
        let r_tracked_stracks: Vec<STrack> = unmatched_tracks
            .iter()
            .map(|&idx| &strack_pool[idx])
            .filter(|t| t.state == TrackLifecycle::Tracked)
            .cloned()
            .collect();

        let dists_second =
            matching::iou_distance(&rects(&r_tracked_stracks), &rects(&detections_low));
        let AssignmentResult {
            matches: matches_second,
            unmatched_tracks: unmatched_tracks_second,
            ..
        } = matching::linear_assignment(&dists_second, 0.5);

        for (itracked, idet) in matches_second {
            let mut track = r_tracked_stracks[itracked].clone();
            track.update(&detections_low[idet], &self.kalman_filter, frame_id, confirm_hits);
            activated_stracks.push(track);
        }

        for idx in unmatched_tracks_second {
            let mut track = r_tracked_stracks[idx].clone();
            track.mark_lost();
            lost_stracks.push(track);
        }

        // Unconfirmed tracks, usually tracks with only one beginning frame
        let detections_rem: Vec<STrack> = unmatched_detections
            .into_iter()
            .map(|idx| detections_high[idx].clone())
            .collect();

        let mut dist_unconfirmed =
            matching::iou_distance(&rects(&unconfirmed), &rects(&detections_rem));
        matching::fuse_score(&mut dist_unconfirmed, &scores(&detections_rem));

        let AssignmentResult {
            matches: matches_unconfirmed,
            unmatched_detections: unmatched_new,
            ..
        } = matching::linear_assignment(&dist_unconfirmed, 0.7);

        // unmatched unconfirmed tracks are simply not carried forward
        for (itracked, idet) in matches_unconfirmed {
            let track = &mut unconfirmed[itracked];
            track.update(&detections_rem[idet], &self.kalman_filter, frame_id, confirm_hits);
            activated_stracks.push(track.clone());
        }

        // Step 4: init new stracks
        for idx in unmatched_new {
            let mut track = detections_rem[idx].clone();
            if track.score < self.config.track_thresh + 0.1 {
                continue;
            }
            let track_id = self.allocate_id();
            track.activate(&self.kalman_filter, track_id, frame_id, confirm_hits);
            activated_stracks.push(track);
        }

        // Step 5: expire lost tracks
        for track in self.lost_stracks.drain(..) {
            if frame_id - track.end_frame() <= self.max_time_lost {
                lost_stracks.push(track);
            }
        }

        let tracked_stracks: Vec<STrack> = activated_stracks
            .into_iter()
            .chain(refind_stracks)
            .filter(|t| t.state == TrackLifecycle::Tracked)
            .collect();
        let lost_stracks = sub_stracks(lost_stracks, &tracked_stracks);

        let (tracked, lost) = remove_duplicate_stracks(&tracked_stracks, &lost_stracks);
        self.tracked_stracks = tracked;
        self.lost_stracks = lost;

        self.tracked_stracks.clone()
    }
}

fn rects(stracks: &[STrack]) -> Vec<Rect> {
    stracks.iter().map(STrack::rect).collect()
}

fn scores(stracks: &[STrack]) -> Vec<f32> {
    stracks.iter().map(|t| t.score).collect()
}

fn joint_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
    let mut exists: HashSet<TrackId> = tlista.iter().map(|t| t.track_id).collect();
    let mut res = tlista;
    for t in tlistb {
        if exists.insert(t.track_id) {
            res.push(t.clone());
        }
    }
    res
}

fn sub_stracks(tlista: Vec<STrack>, tlistb: &[STrack]) -> Vec<STrack> {
    let b_ids: HashSet<TrackId> = tlistb.iter().map(|t| t.track_id).collect();
    tlista
        .into_iter()
        .filter(|t| !b_ids.contains(&t.track_id))
        .collect()
}

/// Drop the younger of any tracked/lost pair that overlaps almost completely.
fn remove_duplicate_stracks(
    stracksa: &[STrack],
    stracksb: &[STrack],
) -> (Vec<STrack>, Vec<STrack>) {
    if stracksa.is_empty() || stracksb.is_empty() {
        return (stracksa.to_vec(), stracksb.to_vec());
    }

    let ious = iou_batch(&rects(stracksa), &rects(stracksb));
    let mut dupa = vec![false; stracksa.len()];
    let mut dupb = vec![false; stracksb.len()];

    for ((i, j), &iou) in ious.indexed_iter() {
        if iou > 0.85 {
            let time_a = stracksa[i].frame_id - stracksa[i].start_frame;
            let time_b = stracksb[j].frame_id - stracksb[j].start_frame;
            if time_a > time_b {
                dupb[j] = true;
            } else {
                dupa[i] = true;
            }
        }
    }

    let keep = |tracks: &[STrack], dup: &[bool]| -> Vec<STrack> {
        tracks
            .iter()
            .zip(dup)
            .filter(|(_, d)| !**d)
            .map(|(t, _)| t.clone())
            .collect()
    };
    (keep(stracksa, &dupa), keep(stracksb, &dupb))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, score: f32) -> Detection {
        Detection::new(x, 100.0, x + 100.0, 200.0, score, 0)
    }

    #[test]
    fn test_ids_are_per_tracker() {
        let mut a = BYTETracker::new(TrackerConfig::default());
        let mut b = BYTETracker::new(TrackerConfig::default());
        assert_eq!(a.update(&[det(100.0, 0.9)])[0].track_id, 1);
        assert_eq!(b.update(&[det(300.0, 0.9)])[0].track_id, 1);
    }

    #[test]
    fn test_confirmation_after_consecutive_hits() {
        let mut tracker = BYTETracker::new(TrackerConfig {
            confirm_hits: 3,
            ..TrackerConfig::default()
        });

        let first = tracker.update(&[det(100.0, 0.9)]);
        assert_eq!(first.len(), 1);
        assert!(!first[0].is_activated);

        assert!(!tracker.update(&[det(102.0, 0.9)])[0].is_activated);
        let third = tracker.update(&[det(104.0, 0.9)]);
        assert!(third[0].is_activated);
        assert_eq!(third[0].track_id, first[0].track_id);
    }

    #[test]
    fn test_unconfirmed_track_dropped_when_missed() {
        let mut tracker = BYTETracker::new(TrackerConfig::default());
        assert_eq!(tracker.update(&[det(100.0, 0.9)]).len(), 1);
        assert!(tracker.update(&[]).is_empty());
        // a fresh detection gets a fresh id
        assert_eq!(tracker.update(&[det(100.0, 0.9)])[0].track_id, 2);
    }
}
