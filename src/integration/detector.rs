//! Trait for object detection backends.

use crate::types::{Detection, Frame};

/// Object detection backend run by the detection stage.
///
/// The pipeline owns the detector on a dedicated worker thread, so `&mut self`
/// is never shared.
///
/// # Example
///
/// ```ignore
/// use cliptrack_rs::{Detection, Detector, Frame};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl Detector for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>, Self::Error> {
///         // Run inference and return every box at or above the threshold
///         Ok(vec![])
///     }
/// }
/// ```
pub trait Detector {
    /// Error type for detection failures.
    type Error: std::fmt::Display;

    /// Run inference on a frame.
    ///
    /// # Arguments
    /// * `frame` - The frame to analyse
    /// * `confidence_threshold` - Minimum confidence of the boxes to return
    ///
    /// # Returns
    /// Boxes of every class; the pipeline filters to its class of interest.
    fn detect(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, Self::Error>;
}
