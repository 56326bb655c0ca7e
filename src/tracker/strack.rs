//! Single object track (STrack) for multi-object tracking.

use crate::rect::Rect;
use crate::tracker::kalman_filter::{KalmanFilter, StateCovariance, StateMean};
use crate::tracker::lifecycle::TrackLifecycle;
use crate::types::{Track, TrackId};

/// Single object track.
#[derive(Debug, Clone)]
pub struct STrack {
    /// Identifier, zero until the track is activated
    pub track_id: TrackId,
    pub state: TrackLifecycle,
    /// Whether the track has been confirmed
    pub is_activated: bool,
    /// Confidence of the last associated detection
    pub score: f32,
    /// Frame of the last association
    pub frame_id: u32,
    pub start_frame: u32,
    /// Consecutive frames with an association, starting at one on activation
    pub hits: u32,
    /// Kalman filter state, set on activation
    kalman: Option<(StateMean, StateCovariance)>,
    /// Box of the detection this track was created from (TLWH)
    pub tlwh: Rect,
}

impl STrack {
    pub fn new(tlwh: Rect, score: f32) -> Self {
        Self {
            track_id: 0,
            state: TrackLifecycle::New,
            is_activated: false,
            score,
            frame_id: 0,
            start_frame: 0,
            hits: 0,
            kalman: None,
            tlwh,
        }
    }

    /// Current box estimate: the filter mean once activated, the detection box before.
    pub fn rect(&self) -> Rect {
        match &self.kalman {
            Some((mean, _)) => Rect::from_xyah(
                mean[0] as f32,
                mean[1] as f32,
                mean[2] as f32,
                mean[3] as f32,
            ),
            None => self.tlwh,
        }
    }

    pub fn end_frame(&self) -> u32 {
        self.frame_id
    }

    pub fn to_track(&self) -> Track {
        Track {
            track_id: self.track_id,
            bbox: self.rect(),
            confirmed: self.is_activated,
        }
    }

    /// Start a new tracklet from this detection.
    pub fn activate(
        &mut self,
        kalman_filter: &KalmanFilter,
        track_id: TrackId,
        frame_id: u32,
        confirm_hits: u32,
    ) {
        self.track_id = track_id;
        self.kalman = Some(kalman_filter.initiate(&KalmanFilter::measure(self.tlwh.to_xyah())));
        self.state = TrackLifecycle::Tracked;
        self.hits = 1;
        self.is_activated = self.hits >= confirm_hits;
        self.frame_id = frame_id;
        self.start_frame = frame_id;
    }

    /// Bring a lost track back with the detection it was re-associated with.
    pub fn re_activate(&mut self, new_track: &STrack, kalman_filter: &KalmanFilter, frame_id: u32) {
        self.correct(new_track, kalman_filter);
        self.state = TrackLifecycle::Tracked;
        self.is_activated = true;
        self.hits = 1;
        self.frame_id = frame_id;
        self.score = new_track.score;
    }

    /// Associate with a detection in the current frame.
    pub fn update(
        &mut self,
        new_track: &STrack,
        kalman_filter: &KalmanFilter,
        frame_id: u32,
        confirm_hits: u32,
    ) {
        self.correct(new_track, kalman_filter);
        self.frame_id = frame_id;
        self.hits += 1;
        self.state = TrackLifecycle::Tracked;
        self.is_activated = self.is_activated || self.hits >= confirm_hits;
        self.score = new_track.score;
    }

    fn correct(&mut self, new_track: &STrack, kalman_filter: &KalmanFilter) {
        let measurement = KalmanFilter::measure(new_track.tlwh.to_xyah());
        if let Some((mean, cov)) = &self.kalman {
            self.kalman = Some(kalman_filter.update(mean, cov, &measurement));
        }
    }

    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        if let Some((mean, cov)) = &self.kalman {
            let mut mean = *mean;
            if self.state != TrackLifecycle::Tracked {
                // freeze height velocity while the object is not observed
                mean[7] = 0.0;
            }
            self.kalman = Some(kalman_filter.predict(&mean, cov));
        }
    }

    pub fn mark_lost(&mut self) {
        self.state = TrackLifecycle::Lost;
    }

    pub fn multi_predict(stracks: &mut [STrack], kalman_filter: &KalmanFilter) {
        for strack in stracks.iter_mut() {
            strack.predict(kalman_filter);
        }
    }
}
