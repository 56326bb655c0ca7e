//! Trait for stateful multi-object trackers.

use std::convert::Infallible;

use crate::tracker::BYTETracker;
use crate::types::{Detection, Frame, Track};

/// Multi-object tracker run by the tracking stage.
///
/// Implementations keep identity state across calls. The pipeline calls `update`
/// from exactly one thread, in frame arrival order.
pub trait MultiObjectTracker {
    /// Error type for tracking failures.
    type Error: std::fmt::Display;

    /// Associate this frame's detections with existing identities.
    ///
    /// Returns confirmed and unconfirmed tracks alike.
    fn update(&mut self, detections: &[Detection], frame: &Frame)
    -> Result<Vec<Track>, Self::Error>;
}

impl MultiObjectTracker for BYTETracker {
    type Error = Infallible;

    fn update(
        &mut self,
        detections: &[Detection],
        _frame: &Frame,
    ) -> Result<Vec<Track>, Self::Error> {
        Ok(BYTETracker::update(self, detections)
            .iter()
            .map(|t| t.to_track())
            .collect())
    }
}
