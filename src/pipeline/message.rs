//! Messages carried by the stage queues.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use image::RgbImage;

use crate::types::{AnnotatedFrame, Detection, Frame, Track, TrackId};

/// Envelope for every stage queue. `Stop` is a control message, never a data value.
#[derive(Debug)]
pub enum StageMessage<T> {
    Work(T),
    Stop,
}

/// A caller waiting for one frame's result.
#[derive(Debug)]
pub struct PendingRequest {
    pub sequence: u64,
    /// Single-use result channel; the receiver is gone if the caller timed out
    pub reply: Sender<AnnotatedFrame>,
    pub submitted_at: Instant,
}

impl PendingRequest {
    /// Hand the finished frame back. Returns false when nobody is waiting any more.
    pub fn deliver(self, frame: AnnotatedFrame) -> bool {
        self.reply.send(frame).is_ok()
    }
}

/// Detection stage input.
#[derive(Debug)]
pub struct FrameRequest {
    pub frame: Frame,
    pub request: PendingRequest,
}

/// Detection stage output.
#[derive(Debug)]
pub struct DetectedFrame {
    pub frame: Frame,
    pub detections: Vec<Detection>,
    pub request: PendingRequest,
}

/// Tracking stage output.
#[derive(Debug)]
pub struct TrackedFrame {
    pub frame: Frame,
    pub tracks: Vec<Track>,
    pub request: PendingRequest,
}

/// One classification window for one track.
#[derive(Debug, Clone)]
pub struct ClassificationJob {
    pub track_id: TrackId,
    /// Store entry the window was taken from; changes when a track is evicted and seen again
    pub incarnation: u64,
    /// Increases with every window taken from the same track
    pub generation: u64,
    /// Copy of the clip buffer when the trigger fired, oldest first
    pub clip: Vec<Arc<RgbImage>>,
}
