//! Counters shared by the pipeline workers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) frames_submitted: AtomicU64,
    pub(crate) frames_completed: AtomicU64,
    pub(crate) frames_timed_out: AtomicU64,
    pub(crate) frames_rejected: AtomicU64,
    pub(crate) detector_failures: AtomicU64,
    pub(crate) tracker_failures: AtomicU64,
    pub(crate) degenerate_crops: AtomicU64,
    pub(crate) annotation_failures: AtomicU64,
    pub(crate) jobs_submitted: AtomicU64,
    pub(crate) jobs_dropped: AtomicU64,
    pub(crate) classifications_completed: AtomicU64,
    pub(crate) classification_failures: AtomicU64,
    pub(crate) late_results: AtomicU64,
    pub(crate) tracks_evicted: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_submitted: u64,
    pub frames_completed: u64,
    pub frames_timed_out: u64,
    /// Submissions refused because the pipeline was stopped
    pub frames_rejected: u64,
    pub detector_failures: u64,
    pub tracker_failures: u64,
    pub degenerate_crops: u64,
    /// Frames returned unannotated because drawing or buffering failed
    pub annotation_failures: u64,
    pub jobs_submitted: u64,
    /// Jobs discarded because the classification queue was full
    pub jobs_dropped: u64,
    pub classifications_completed: u64,
    pub classification_failures: u64,
    /// Frames finished after their caller had stopped waiting
    pub late_results: u64,
    pub tracks_evicted: u64,
}

impl PipelineStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_submitted: load(&self.frames_submitted),
            frames_completed: load(&self.frames_completed),
            frames_timed_out: load(&self.frames_timed_out),
            frames_rejected: load(&self.frames_rejected),
            detector_failures: load(&self.detector_failures),
            tracker_failures: load(&self.tracker_failures),
            degenerate_crops: load(&self.degenerate_crops),
            annotation_failures: load(&self.annotation_failures),
            jobs_submitted: load(&self.jobs_submitted),
            jobs_dropped: load(&self.jobs_dropped),
            classifications_completed: load(&self.classifications_completed),
            classification_failures: load(&self.classification_failures),
            late_results: load(&self.late_results),
            tracks_evicted: load(&self.tracks_evicted),
        }
    }
}
