//! Request/response correlation over the stage threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, SendTimeoutError, Sender};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::annotation::{AnnotationStage, Annotator};
use super::classification::ClassificationWorker;
use super::detection::DetectionStage;
use super::message::{FrameRequest, PendingRequest, StageMessage};
use super::state_store::TrackStateStore;
use super::stats::{PipelineStats, StatsSnapshot};
use super::stream::FrameStream;
use super::tracking::TrackingStage;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::integration::{ActionClassifier, Detector, MultiObjectTracker};
use crate::types::{AnnotatedFrame, Frame};

/// Running pipeline. Submit frames with [`process`](Self::process); each call
/// blocks until that frame comes back annotated or its deadline passes.
///
/// `process` takes `&self`, so one pipeline can be shared between threads
/// behind an `Arc`. Dropping the last handle shuts it down.
///
/// ```no_run
/// use cliptrack_rs::{ActionPipeline, BYTETracker, PipelineConfig, TrackerConfig};
/// # use cliptrack_rs::{ActionClassifier, Classification, Detection, Detector, Frame};
/// # use image::RgbImage;
/// # use std::{convert::Infallible, sync::Arc};
/// # struct Yolo;
/// # impl Detector for Yolo {
/// #     type Error = Infallible;
/// #     fn detect(&mut self, _: &Frame, _: f32) -> Result<Vec<Detection>, Infallible> { Ok(vec![]) }
/// # }
/// # struct Clips;
/// # impl ActionClassifier for Clips {
/// #     type Error = Infallible;
/// #     fn classify(&self, _: &[Arc<RgbImage>]) -> Result<Classification, Infallible> {
/// #         Ok(Classification::new("idle", 1.0))
/// #     }
/// # }
///
/// let pipeline = ActionPipeline::spawn(
///     PipelineConfig::default(),
///     Yolo,
///     BYTETracker::new(TrackerConfig::default()),
///     Clips,
/// )?;
///
/// let annotated = pipeline.process(RgbImage::new(640, 480))?;
/// for a in &annotated.annotations {
///     println!("{}", a.text);
/// }
/// pipeline.shutdown();
/// # Ok::<(), cliptrack_rs::PipelineError>(())
/// ```
pub struct ActionPipeline {
    config: PipelineConfig,
    /// `None` once shut down; taken under the write lock so no submit races the stop
    intake: RwLock<Option<Sender<StageMessage<FrameRequest>>>>,
    next_sequence: AtomicU64,
    store: Arc<TrackStateStore>,
    stats: Arc<PipelineStats>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ActionPipeline {
    /// Validate `config`, then start the stage threads and the classification pool.
    pub fn spawn<D, T, C>(config: PipelineConfig, detector: D, tracker: T, classifier: C) -> Result<Self>
    where
        D: Detector + Send + 'static,
        T: MultiObjectTracker + Send + 'static,
        C: ActionClassifier + Send + Sync + 'static,
    {
        config.validate()?;
        let annotator = Annotator::from_config(&config)?;
        let store = Arc::new(TrackStateStore::from_config(&config));
        let stats = Arc::new(PipelineStats::default());

        let (intake_tx, intake_rx) = bounded(config.stage_queue_capacity);
        let (detected_tx, detected_rx) = bounded(config.stage_queue_capacity);
        let (tracked_tx, tracked_rx) = bounded(config.stage_queue_capacity);
        let (jobs_tx, jobs_rx) = bounded(config.classification_queue_capacity);

        let mut workers = Vec::with_capacity(3 + config.classification_workers);

        let classifier = Arc::new(classifier);
        for id in 0..config.classification_workers {
            let worker = ClassificationWorker::new(
                id,
                Arc::clone(&classifier),
                Arc::clone(&store),
                config.clip_len,
                Arc::clone(&stats),
            );
            let jobs = jobs_rx.clone();
            workers.push(spawn_named(format!("classify-{id}"), move || worker.run(jobs))?);
        }
        drop(jobs_rx);

        let annotation = AnnotationStage::new(
            &config,
            annotator,
            Arc::clone(&store),
            jobs_tx,
            Arc::clone(&stats),
        );
        workers.push(spawn_named("annotate".into(), move || annotation.run(tracked_rx))?);

        let tracking = TrackingStage::new(tracker, Arc::clone(&stats));
        workers.push(spawn_named("track".into(), move || {
            tracking.run(detected_rx, tracked_tx)
        })?);

        let detection = DetectionStage::new(
            detector,
            config.target_class_id,
            config.detection_confidence,
            Arc::clone(&stats),
        );
        workers.push(spawn_named("detect".into(), move || {
            detection.run(intake_rx, detected_tx)
        })?);

        info!(
            classification_workers = config.classification_workers,
            clip_len = config.clip_len,
            timeout_ms = config.request_timeout_ms,
            "pipeline started"
        );

        Ok(Self {
            config,
            intake: RwLock::new(Some(intake_tx)),
            next_sequence: AtomicU64::new(0),
            store,
            stats,
            workers: Mutex::new(workers),
        })
    }

    /// Run one frame through the pipeline and wait for its annotated result.
    ///
    /// Returns [`PipelineError::Timeout`] if the result is not back within the
    /// configured request timeout, and [`PipelineError::Stopped`] after shutdown.
    pub fn process(&self, image: RgbImage) -> Result<AnnotatedFrame> {
        let submitted_at = Instant::now();
        let deadline = submitted_at + self.config.request_timeout();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        let (reply_tx, reply_rx) = bounded(1);
        let work = FrameRequest {
            frame: Frame::new(sequence, image),
            request: PendingRequest {
                sequence,
                reply: reply_tx,
                submitted_at,
            },
        };

        {
            let intake = self.intake.read().unwrap_or_else(PoisonError::into_inner);
            let Some(sender) = intake.as_ref() else {
                PipelineStats::incr(&self.stats.frames_rejected);
                return Err(PipelineError::Stopped);
            };

            PipelineStats::incr(&self.stats.frames_submitted);
            match sender.send_deadline(StageMessage::Work(work), deadline) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    return Err(self.timed_out(sequence, submitted_at));
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    PipelineStats::incr(&self.stats.frames_rejected);
                    return Err(PipelineError::Stopped);
                }
            }
        }

        match reply_rx.recv_deadline(deadline) {
            Ok(annotated) => {
                debug!(
                    sequence,
                    boxes = annotated.annotations.len(),
                    elapsed_ms = submitted_at.elapsed().as_millis() as u64,
                    "frame processed"
                );
                Ok(annotated)
            }
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out(sequence, submitted_at)),
            // A stage thread died with the request in hand.
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::Stopped),
        }
    }

    /// Feed an iterator of frames through [`process`](Self::process) in order.
    pub fn stream<I>(&self, frames: I) -> FrameStream<'_, I::IntoIter>
    where
        I: IntoIterator<Item = RgbImage>,
    {
        FrameStream::new(self, frames.into_iter())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Per-track clip buffers and labels, shared with the workers.
    pub fn track_states(&self) -> &TrackStateStore {
        &self.store
    }

    pub fn track_count(&self) -> usize {
        self.store.len()
    }

    /// Stop accepting frames, let in-flight work drain, and join every worker.
    ///
    /// Idempotent. Later calls to [`process`](Self::process) return
    /// [`PipelineError::Stopped`] without blocking.
    pub fn shutdown(&self) {
        let intake = self
            .intake
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(intake) = intake else {
            return;
        };

        info!("pipeline shutting down");
        if intake.send(StageMessage::Stop).is_err() {
            warn!("detection stage already exited");
        }
        drop(intake);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "worker thread panicked");
            }
        }

        let stats = self.stats.snapshot();
        info!(
            frames_completed = stats.frames_completed,
            frames_timed_out = stats.frames_timed_out,
            jobs_submitted = stats.jobs_submitted,
            jobs_dropped = stats.jobs_dropped,
            "pipeline stopped"
        );
    }

    fn timed_out(&self, sequence: u64, submitted_at: Instant) -> PipelineError {
        PipelineStats::incr(&self.stats.frames_timed_out);
        let waited: Duration = submitted_at.elapsed();
        warn!(sequence, waited_ms = waited.as_millis() as u64, "frame timed out");
        PipelineError::Timeout { sequence, waited }
    }
}

impl Drop for ActionPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_named<F>(name: String, f: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("cliptrack-{name}"))
        .spawn(f)
}
