//! Integration points for the external detector, tracker and classifier.
//!
//! The pipeline is generic over these traits; any inference backend (ONNX Runtime,
//! Burn, a remote service) can be connected by implementing them.

mod builder;
mod classifier;
mod detector;
mod tracker;

pub use builder::DetectionBuilder;
pub use classifier::ActionClassifier;
pub use detector::Detector;
pub use tracker::MultiObjectTracker;
