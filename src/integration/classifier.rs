//! Trait for clip-level action classifiers.

use std::sync::Arc;

use image::RgbImage;

use crate::types::Classification;

/// Action classifier shared by every classification worker.
///
/// Called concurrently through `&self`; the model must be read-only during inference.
pub trait ActionClassifier {
    /// Error type for classification failures.
    type Error: std::fmt::Display;

    /// Classify one window of square crops, oldest first.
    ///
    /// The pipeline always passes exactly `clip_len` crops of `clip_size` pixels.
    fn classify(&self, clip: &[Arc<RgbImage>]) -> Result<Classification, Self::Error>;
}
