//! Tracking stage: the single owner of the stateful tracker.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use super::guarded;
use super::message::{DetectedFrame, StageMessage, TrackedFrame};
use super::stats::PipelineStats;
use crate::integration::MultiObjectTracker;

/// Runs on one dedicated thread and is the tracker's only caller, so identity
/// assignment always sees frames one at a time in arrival order.
pub(crate) struct TrackingStage<T> {
    tracker: T,
    stats: Arc<PipelineStats>,
}

impl<T: MultiObjectTracker> TrackingStage<T> {
    pub(crate) fn new(tracker: T, stats: Arc<PipelineStats>) -> Self {
        Self { tracker, stats }
    }

    pub(crate) fn run(
        mut self,
        input: Receiver<StageMessage<DetectedFrame>>,
        output: Sender<StageMessage<TrackedFrame>>,
    ) {
        info!("tracking stage started");

        while let Ok(StageMessage::Work(detected)) = input.recv() {
            let DetectedFrame {
                frame,
                detections,
                request,
            } = detected;

            let tracker = &mut self.tracker;
            let tracks = match guarded(|| tracker.update(&detections, &frame)) {
                Ok(tracks) => tracks,
                Err(error) => {
                    PipelineStats::incr(&self.stats.tracker_failures);
                    warn!(
                        sequence = frame.sequence,
                        %error,
                        "tracker failed, forwarding frame without tracks"
                    );
                    Vec::new()
                }
            };

            let next = TrackedFrame {
                frame,
                tracks,
                request,
            };
            if output.send(StageMessage::Work(next)).is_err() {
                warn!("annotation stage is gone, tracking stage exiting");
                break;
            }
        }

        let _ = output.send(StageMessage::Stop);
        info!("tracking stage stopped");
    }
}
