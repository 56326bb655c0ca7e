//! Classification worker pool.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use super::guarded;
use super::message::{ClassificationJob, StageMessage};
use super::state_store::TrackStateStore;
use super::stats::PipelineStats;
use crate::integration::ActionClassifier;

/// One pool member. All members share the classifier and pull from one job queue.
pub(crate) struct ClassificationWorker<C> {
    id: usize,
    classifier: Arc<C>,
    store: Arc<TrackStateStore>,
    clip_len: usize,
    stats: Arc<PipelineStats>,
}

impl<C: ActionClassifier> ClassificationWorker<C> {
    pub(crate) fn new(
        id: usize,
        classifier: Arc<C>,
        store: Arc<TrackStateStore>,
        clip_len: usize,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            id,
            classifier,
            store,
            clip_len,
            stats,
        }
    }

    pub(crate) fn run(self, jobs: Receiver<StageMessage<ClassificationJob>>) {
        info!(worker = self.id, "classification worker started");

        while let Ok(StageMessage::Work(job)) = jobs.recv() {
            self.handle(job);
        }

        info!(worker = self.id, "classification worker stopped");
    }

    fn handle(&self, job: ClassificationJob) {
        if job.clip.len() != self.clip_len {
            PipelineStats::incr(&self.stats.classification_failures);
            warn!(
                worker = self.id,
                track_id = job.track_id,
                len = job.clip.len(),
                expected = self.clip_len,
                "skipping clip of unexpected length"
            );
            return;
        }

        let started = Instant::now();
        let classifier = &self.classifier;
        match guarded(|| classifier.classify(&job.clip)) {
            Ok(result) if (0.0..=1.0).contains(&result.probability) => {
                PipelineStats::incr(&self.stats.classifications_completed);
                let label = result.to_string();
                let stored = self.store.record_job_result(&job, result);
                debug!(
                    worker = self.id,
                    track_id = job.track_id,
                    generation = job.generation,
                    %label,
                    stored,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "clip classified"
                );
            }
            Ok(result) => {
                PipelineStats::incr(&self.stats.classification_failures);
                warn!(
                    worker = self.id,
                    track_id = job.track_id,
                    probability = result.probability,
                    "classifier returned a probability outside [0, 1], keeping previous label"
                );
            }
            Err(error) => {
                PipelineStats::incr(&self.stats.classification_failures);
                warn!(
                    worker = self.id,
                    track_id = job.track_id,
                    %error,
                    "classification failed, keeping previous label"
                );
            }
        }
    }
}
