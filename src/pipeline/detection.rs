//! Detection stage: frame in, frame plus filtered detections out.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use super::guarded;
use super::message::{DetectedFrame, FrameRequest, StageMessage};
use super::stats::PipelineStats;
use crate::integration::Detector;
use crate::types::{Detection, Frame};

pub(crate) struct DetectionStage<D> {
    detector: D,
    target_class_id: u32,
    confidence_threshold: f32,
    stats: Arc<PipelineStats>,
}

impl<D: Detector> DetectionStage<D> {
    pub(crate) fn new(
        detector: D,
        target_class_id: u32,
        confidence_threshold: f32,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            detector,
            target_class_id,
            confidence_threshold,
            stats,
        }
    }

    pub(crate) fn run(
        mut self,
        input: Receiver<StageMessage<FrameRequest>>,
        output: Sender<StageMessage<DetectedFrame>>,
    ) {
        info!("detection stage started");

        while let Ok(StageMessage::Work(FrameRequest { frame, request })) = input.recv() {
            let detections = self.detect(&frame);
            let next = DetectedFrame {
                frame,
                detections,
                request,
            };
            if output.send(StageMessage::Work(next)).is_err() {
                warn!("tracking stage is gone, detection stage exiting");
                break;
            }
        }

        let _ = output.send(StageMessage::Stop);
        info!("detection stage stopped");
    }

    /// Detections of the class of interest. A failed detector yields none.
    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        let threshold = self.confidence_threshold;
        let detector = &mut self.detector;

        match guarded(|| detector.detect(frame, threshold)) {
            Ok(detections) => detections
                .into_iter()
                .filter(|d| d.class_id == self.target_class_id && d.confidence >= threshold)
                .collect(),
            Err(error) => {
                PipelineStats::incr(&self.stats.detector_failures);
                warn!(
                    sequence = frame.sequence,
                    %error,
                    "detector failed, forwarding frame without detections"
                );
                Vec::new()
            }
        }
    }
}
