//! Bundled ByteTrack tracker, usable as the pipeline's [`MultiObjectTracker`](crate::MultiObjectTracker).

mod byte_tracker;
mod kalman_filter;
mod lifecycle;
mod matching;
mod strack;

pub use byte_tracker::{BYTETracker, TrackerConfig};
pub use lifecycle::TrackLifecycle;
pub use strack::STrack;
