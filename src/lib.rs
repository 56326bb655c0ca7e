//! Streaming detect → track → classify pipeline for video frames.
//!
//! Frames go through a detector, a multi-object tracker and an annotation stage on
//! dedicated threads. Every confirmed track gets its own clip buffer; when a buffer
//! fills, the clip is handed to an action classifier on a worker pool without
//! blocking the frame path, and the resulting label is drawn on later frames.
//!
//! The detector and classifier are supplied by the caller through [`Detector`] and
//! [`ActionClassifier`]. A ByteTrack implementation of [`MultiObjectTracker`] is
//! bundled as [`BYTETracker`].

pub mod config;
pub mod error;
pub mod integration;
pub mod pipeline;
pub mod rect;
pub mod tracker;
pub mod types;

pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError, Result};
pub use integration::{ActionClassifier, DetectionBuilder, Detector, MultiObjectTracker};
pub use pipeline::{
    ActionPipeline, ClassificationJob, FrameStream, StatsSnapshot, StreamOutcome, StreamResponse,
    TrackStateStore,
};
pub use rect::Rect;
pub use tracker::{BYTETracker, TrackerConfig};
pub use types::{AnnotatedFrame, Annotation, Classification, Detection, Frame, Track, TrackId};
