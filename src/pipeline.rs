//! Streaming detect → track → annotate pipeline with asynchronous clip classification.
//!
//! Each stage is a long-lived thread blocked on a bounded crossbeam queue:
//! - Detection: runs the [`Detector`](crate::Detector), keeps the class of interest
//! - Tracking: the only caller of the [`MultiObjectTracker`](crate::MultiObjectTracker)
//! - Annotation: crops confirmed tracks into the [`TrackStateStore`], fires
//!   classification windows, draws boxes and labels, replies to the caller
//! - Classification pool: runs the [`ActionClassifier`](crate::ActionClassifier)
//!   and writes labels back into the store
//!
//! [`ActionPipeline`] correlates every submitted frame with its result.

mod annotation;
mod classification;
mod correlator;
mod detection;
mod message;
mod state_store;
mod stats;
mod stream;
mod tracking;

use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

pub use annotation::label_text;
pub use correlator::ActionPipeline;
pub use message::ClassificationJob;
pub use state_store::{TrackHandle, TrackState, TrackStateStore};
pub use stats::{PipelineStats, StatsSnapshot};
pub use stream::{FrameStream, StreamOutcome, StreamResponse};

/// Run a collaborator call, turning both its error and a panic into a message.
///
/// Stages use this to stay alive when a model backend misbehaves on one frame.
fn guarded<T, E: Display>(call: impl FnOnce() -> Result<T, E>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
