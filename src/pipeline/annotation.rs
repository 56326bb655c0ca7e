//! Annotation stage: buffer crops, fire classification windows, draw, reply.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ab_glyph::{FontVec, PxScale};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as PixelRect;
use tracing::{debug, info, trace, warn};

use super::guarded;
use super::message::{ClassificationJob, StageMessage, TrackedFrame};
use super::state_store::TrackStateStore;
use super::stats::PipelineStats;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::rect::CropRegion;
use crate::types::{AnnotatedFrame, Annotation, Classification, Frame, Track, TrackId};

/// Text drawn above a track's box: `"<kind> #<id>"`, plus `" | <label> (<p>)"`
/// once the track has been classified.
pub fn label_text(kind: &str, track_id: TrackId, classification: Option<&Classification>) -> String {
    match classification {
        Some(c) => format!("{kind} #{track_id} | {c}"),
        None => format!("{kind} #{track_id}"),
    }
}

/// Draws boxes and label text onto frames.
pub(crate) struct Annotator {
    font: Option<FontVec>,
    color: Rgb<u8>,
    thickness: u32,
    scale: PxScale,
}

impl Annotator {
    pub(crate) fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let font = match &config.font_path {
            Some(path) => {
                let data = std::fs::read(path)
                    .map_err(|e| PipelineError::Font(format!("{}: {e}", path.display())))?;
                let font = FontVec::try_from_vec(data)
                    .map_err(|e| PipelineError::Font(format!("{}: {e}", path.display())))?;
                Some(font)
            }
            None => {
                info!("no label font configured, drawing boxes only");
                None
            }
        };

        Ok(Self {
            font,
            color: Rgb(config.box_color),
            thickness: config.box_thickness,
            scale: PxScale::from(config.label_scale),
        })
    }

    pub(crate) fn draw(&self, image: &mut RgbImage, region: CropRegion, text: &str) {
        // Nested one-pixel outlines, growing inward.
        for inset in 0..self.thickness {
            let width = region.width.saturating_sub(2 * inset);
            let height = region.height.saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }
            let outline = PixelRect::at((region.x + inset) as i32, (region.y + inset) as i32)
                .of_size(width, height);
            draw_hollow_rect_mut(image, outline, self.color);
        }

        if let Some(font) = &self.font {
            let above = region.y as i32 - self.scale.y.ceil() as i32 - 2;
            let y = if above >= 0 {
                above
            } else {
                (region.y + self.thickness + 2) as i32
            };
            draw_text_mut(image, self.color, region.x as i32, y, self.scale, font, text);
        }
    }
}

/// Run `annotate` on the frame. If it fails, the frame goes back as received,
/// without annotations, and the stage keeps running.
fn annotate_or_passthrough(
    frame: Frame,
    stats: &PipelineStats,
    annotate: impl FnOnce(Frame) -> AnnotatedFrame,
) -> AnnotatedFrame {
    let received = frame.clone();
    match guarded(|| Ok::<_, Infallible>(annotate(frame))) {
        Ok(annotated) => annotated,
        Err(error) => {
            PipelineStats::incr(&stats.annotation_failures);
            warn!(
                sequence = received.sequence,
                %error,
                "annotation failed, returning frame unannotated"
            );
            AnnotatedFrame {
                sequence: received.sequence,
                image: received.image,
                annotations: Vec::new(),
            }
        }
    }
}

pub(crate) struct AnnotationStage {
    store: Arc<TrackStateStore>,
    jobs: Sender<StageMessage<ClassificationJob>>,
    annotator: Annotator,
    target_label: String,
    clip_len: usize,
    retain_tail_len: usize,
    clip_size: u32,
    classification_workers: usize,
    sweep_interval: Duration,
    last_sweep: Instant,
    stats: Arc<PipelineStats>,
}

impl AnnotationStage {
    pub(crate) fn new(
        config: &PipelineConfig,
        annotator: Annotator,
        store: Arc<TrackStateStore>,
        jobs: Sender<StageMessage<ClassificationJob>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            store,
            jobs,
            annotator,
            target_label: config.target_label.clone(),
            clip_len: config.clip_len,
            retain_tail_len: config.retain_tail_len,
            clip_size: config.clip_size,
            classification_workers: config.classification_workers,
            sweep_interval: config.eviction_sweep_interval(),
            last_sweep: Instant::now(),
            stats,
        }
    }

    pub(crate) fn run(mut self, input: Receiver<StageMessage<TrackedFrame>>) {
        info!("annotation stage started");

        while let Ok(StageMessage::Work(tracked)) = input.recv() {
            let TrackedFrame {
                frame,
                tracks,
                request,
            } = tracked;

            let now = Instant::now();
            let annotated =
                annotate_or_passthrough(frame, &self.stats, |frame| self.annotate(frame, &tracks, now));
            let sequence = request.sequence;
            let boxes = annotated.annotations.len();
            let latency = now.saturating_duration_since(request.submitted_at);

            if request.deliver(annotated) {
                PipelineStats::incr(&self.stats.frames_completed);
                trace!(
                    sequence,
                    boxes,
                    latency_ms = latency.as_millis() as u64,
                    "frame delivered"
                );
            } else {
                PipelineStats::incr(&self.stats.late_results);
                debug!(sequence, "caller stopped waiting, discarding result");
            }

            self.sweep(now);
        }

        for _ in 0..self.classification_workers {
            if self.jobs.send(StageMessage::Stop).is_err() {
                break;
            }
        }
        info!("annotation stage stopped");
    }

    fn annotate(&self, frame: Frame, tracks: &[Track], now: Instant) -> AnnotatedFrame {
        let Frame {
            sequence,
            mut image,
        } = frame;

        // Crop every track before anything is drawn so boxes never leak into clips.
        let mut regions = Vec::new();
        for track in tracks.iter().filter(|t| t.confirmed) {
            let Some(region) = track.bbox.crop_region(image.width(), image.height()) else {
                PipelineStats::incr(&self.stats.degenerate_crops);
                trace!(sequence, track_id = track.track_id, "degenerate box, skipped");
                continue;
            };

            let crop = imageops::crop_imm(&image, region.x, region.y, region.width, region.height)
                .to_image();
            let clip_frame =
                imageops::resize(&crop, self.clip_size, self.clip_size, FilterType::Triangle);

            if let Some(job) = self.store.observe(
                track.track_id,
                Arc::new(clip_frame),
                self.clip_len,
                self.retain_tail_len,
                now,
            ) {
                self.submit(job);
            }
            regions.push((track, region));
        }

        let mut annotations = Vec::with_capacity(regions.len());
        for (track, region) in regions {
            let classification = self.store.current_label(track.track_id);
            let text = label_text(&self.target_label, track.track_id, classification.as_ref());
            self.annotator.draw(&mut image, region, &text);
            annotations.push(Annotation {
                track_id: track.track_id,
                bbox: track.bbox,
                text,
                classification,
            });
        }

        AnnotatedFrame {
            sequence,
            image,
            annotations,
        }
    }

    /// Hand a window to the pool without waiting. A full queue drops the window.
    fn submit(&self, job: ClassificationJob) {
        let track_id = job.track_id;
        match self.jobs.try_send(StageMessage::Work(job)) {
            Ok(()) => PipelineStats::incr(&self.stats.jobs_submitted),
            Err(TrySendError::Full(_)) => {
                PipelineStats::incr(&self.stats.jobs_dropped);
                warn!(track_id, "classification queue full, dropping clip window");
            }
            Err(TrySendError::Disconnected(_)) => {
                PipelineStats::incr(&self.stats.jobs_dropped);
                warn!(track_id, "classification pool is gone, dropping clip window");
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) < self.sweep_interval {
            return;
        }
        self.last_sweep = now;

        let evicted = self.store.evict_idle(now);
        if evicted > 0 {
            PipelineStats::add(&self.stats.tracks_evicted, evicted as u64);
            debug!(evicted, remaining = self.store.len(), "evicted idle tracks");
        }
    }
}
