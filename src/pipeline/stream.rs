//! Ordered frame-stream adapter over [`ActionPipeline::process`].

use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, warn};

use super::correlator::ActionPipeline;
use crate::error::PipelineError;
use crate::types::Annotation;

/// What happened to one frame of a stream.
#[derive(Debug)]
pub enum StreamOutcome {
    Annotated(Vec<Annotation>),
    /// The frame failed or timed out; the response carries the frame as received
    Passthrough(PipelineError),
}

/// One response per input frame, in input order.
#[derive(Debug)]
pub struct StreamResponse {
    pub image: RgbImage,
    pub outcome: StreamOutcome,
    pub elapsed: Duration,
}

impl StreamResponse {
    pub fn is_annotated(&self) -> bool {
        matches!(self.outcome, StreamOutcome::Annotated(_))
    }
}

/// Iterator returned by [`ActionPipeline::stream`].
///
/// Frames are submitted one at a time, so responses come back in input order.
/// A frame that fails is answered with an unannotated copy instead of ending
/// the stream.
pub struct FrameStream<'a, I> {
    pipeline: &'a ActionPipeline,
    frames: I,
}

impl<'a, I> FrameStream<'a, I> {
    pub(crate) fn new(pipeline: &'a ActionPipeline, frames: I) -> Self {
        Self { pipeline, frames }
    }
}

impl<I: Iterator<Item = RgbImage>> Iterator for FrameStream<'_, I> {
    type Item = StreamResponse;

    fn next(&mut self) -> Option<Self::Item> {
        let image = self.frames.next()?;
        let original = image.clone();
        let started = Instant::now();

        let response = match self.pipeline.process(image) {
            Ok(annotated) => StreamResponse {
                image: annotated.image,
                outcome: StreamOutcome::Annotated(annotated.annotations),
                elapsed: started.elapsed(),
            },
            Err(error) => {
                warn!(%error, "frame failed, passing it through unannotated");
                StreamResponse {
                    image: original,
                    outcome: StreamOutcome::Passthrough(error),
                    elapsed: started.elapsed(),
                }
            }
        };

        debug!(
            elapsed_ms = response.elapsed.as_millis() as u64,
            annotated = response.is_annotated(),
            "stream frame done"
        );
        Some(response)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.frames.size_hint()
    }
}
