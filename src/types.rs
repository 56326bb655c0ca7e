//! Values handed between the collaborators and the pipeline stages.

use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::rect::Rect;

/// Stable identity assigned by a tracker to one physical object.
pub type TrackId = u64;

/// One inbound video frame tagged with its arrival order.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonically increasing arrival sequence number
    pub sequence: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self { sequence, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Detector output for a single object.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: Rect,
    pub confidence: f32,
    pub class_id: u32,
}

impl Detection {
    /// Create a detection from corner coordinates (x1, y1, x2, y2).
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            confidence,
            class_id,
        }
    }

    pub fn from_rect(bbox: Rect, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Tracker output for a single object in the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: TrackId,
    pub bbox: Rect,
    /// Identity has persisted long enough to be trusted for annotation and classification
    pub confirmed: bool,
}

/// Action label produced by the classifier for one clip window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    /// Probability of `label`, in [0, 1]
    pub probability: f32,
}

impl Classification {
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.label, self.probability)
    }
}

/// What the annotation stage drew for one confirmed track.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub track_id: TrackId,
    pub bbox: Rect,
    pub text: String,
    pub classification: Option<Classification>,
}

/// Finished pipeline output for one submitted frame.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub sequence: u64,
    pub image: RgbImage,
    pub annotations: Vec<Annotation>,
}
