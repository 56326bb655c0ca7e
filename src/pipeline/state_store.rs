//! Per-track clip buffers and last classification results.
//!
//! The store is the only shared mutable state in the pipeline. The annotation stage
//! appends observations and takes classification windows; classification workers
//! write results back. Every operation on one track runs under that track's mutex,
//! so appends, trigger checks, truncation and result writes never interleave.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, trace};

use crate::config::PipelineConfig;
use crate::pipeline::message::ClassificationJob;
use crate::types::{Classification, TrackId};

/// Shared handle to one track's state.
pub type TrackHandle = Arc<Mutex<TrackState>>;

/// Accumulated observations and latest classification of one track.
#[derive(Debug)]
pub struct TrackState {
    clip: VecDeque<Arc<RgbImage>>,
    window_size: usize,
    classification: Option<Classification>,
    /// Store-wide id of this entry; a track recreated after eviction gets a new one
    incarnation: u64,
    /// Set when the buffer reached the trigger threshold, cleared on truncation
    trigger_fired: bool,
    /// Number of windows taken so far
    generation: u64,
    /// Window the current classification came from
    recorded_generation: u64,
    last_seen: Instant,
}

impl TrackState {
    fn new(window_size: usize, incarnation: u64, now: Instant) -> Self {
        Self {
            clip: VecDeque::with_capacity(window_size),
            window_size,
            classification: None,
            incarnation,
            trigger_fired: false,
            generation: 0,
            recorded_generation: 0,
            last_seen: now,
        }
    }

    /// Append a crop, dropping the oldest ones beyond the window.
    pub fn append(&mut self, image: Arc<RgbImage>, now: Instant) {
        self.clip.push_back(image);
        while self.clip.len() > self.window_size {
            self.clip.pop_front();
        }
        self.last_seen = now;
    }

    pub fn len(&self) -> usize {
        self.clip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clip.is_empty()
    }

    pub fn clip(&self) -> impl Iterator<Item = &Arc<RgbImage>> {
        self.clip.iter()
    }

    /// True once per crossing of `threshold`, not on every call while at or above it.
    pub fn should_trigger(&mut self, threshold: usize) -> bool {
        if self.clip.len() < threshold {
            self.trigger_fired = false;
            return false;
        }
        if self.trigger_fired {
            return false;
        }
        self.trigger_fired = true;
        true
    }

    /// Copy the whole buffer and keep only the newest `retain_tail_len` entries.
    ///
    /// Returns the window's generation along with the copy.
    pub fn snapshot_and_truncate(&mut self, retain_tail_len: usize) -> (u64, Vec<Arc<RgbImage>>) {
        let snapshot: Vec<_> = self.clip.iter().cloned().collect();
        let excess = self.clip.len().saturating_sub(retain_tail_len);
        self.clip.drain(..excess);
        self.trigger_fired = false;
        self.generation += 1;
        (self.generation, snapshot)
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    /// Store a result unless a newer window has already been recorded, or the
    /// window was taken from an earlier entry for the same track id.
    fn record(&mut self, incarnation: u64, generation: u64, classification: Classification) -> bool {
        if incarnation != self.incarnation || generation < self.recorded_generation {
            return false;
        }
        self.recorded_generation = generation;
        self.classification = Some(classification);
        true
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

/// Map from track identity to its [`TrackState`], with idle eviction.
#[derive(Debug)]
pub struct TrackStateStore {
    tracks: RwLock<HashMap<TrackId, TrackHandle>>,
    window_size: usize,
    ttl: Duration,
    max_tracks: usize,
    next_incarnation: AtomicU64,
}

impl TrackStateStore {
    pub fn new(window_size: usize, ttl: Duration, max_tracks: usize) -> Self {
        Self {
            tracks: RwLock::new(HashMap::new()),
            window_size,
            ttl,
            max_tracks: max_tracks.max(1),
            next_incarnation: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.window_size, config.track_ttl(), config.max_tracks)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    pub fn contains(&self, track_id: TrackId) -> bool {
        self.read_map().contains_key(&track_id)
    }

    /// Handle to a track's state, created empty on first use.
    pub fn get_or_create(&self, track_id: TrackId) -> TrackHandle {
        self.get_or_create_at(track_id, Instant::now())
    }

    fn get_or_create_at(&self, track_id: TrackId, now: Instant) -> TrackHandle {
        if let Some(handle) = self.get(track_id) {
            return handle;
        }

        let mut tracks = self.write_map();
        if let Some(handle) = tracks.get(&track_id) {
            return Arc::clone(handle);
        }
        if tracks.len() >= self.max_tracks {
            let oldest = tracks
                .iter()
                .min_by_key(|(_, handle)| lock(handle).last_seen)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                tracks.remove(&oldest);
                debug!(track_id = oldest, "track store full, evicted least recently seen track");
            }
        }

        let incarnation = self.next_incarnation.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(Mutex::new(TrackState::new(self.window_size, incarnation, now)));
        tracks.insert(track_id, Arc::clone(&handle));
        handle
    }

    fn get(&self, track_id: TrackId) -> Option<TrackHandle> {
        self.read_map().get(&track_id).cloned()
    }

    pub fn append_observation(&self, track_id: TrackId, image: impl Into<Arc<RgbImage>>) {
        let now = Instant::now();
        lock(&self.get_or_create_at(track_id, now)).append(image.into(), now);
    }

    /// Edge-triggered: true only when the buffer first reaches `threshold`.
    pub fn should_trigger(&self, track_id: TrackId, threshold: usize) -> bool {
        self.get(track_id)
            .is_some_and(|handle| lock(&handle).should_trigger(threshold))
    }

    pub fn snapshot_and_truncate(&self, track_id: TrackId, retain_tail_len: usize) -> Vec<Arc<RgbImage>> {
        self.get(track_id)
            .map(|handle| lock(&handle).snapshot_and_truncate(retain_tail_len).1)
            .unwrap_or_default()
    }

    /// Append a crop and, if that crosses `threshold`, take a classification window,
    /// all under one lock of the track.
    pub fn observe(
        &self,
        track_id: TrackId,
        image: Arc<RgbImage>,
        threshold: usize,
        retain_tail_len: usize,
        now: Instant,
    ) -> Option<ClassificationJob> {
        let handle = self.get_or_create_at(track_id, now);
        let mut state = lock(&handle);
        state.append(image, now);
        if !state.should_trigger(threshold) {
            return None;
        }

        let (generation, clip) = state.snapshot_and_truncate(retain_tail_len);
        trace!(track_id, generation, len = clip.len(), "classification window ready");
        Some(ClassificationJob {
            track_id,
            incarnation: state.incarnation,
            generation,
            clip,
        })
    }

    /// Overwrite a track's label. Unknown (never seen or evicted) tracks are ignored.
    pub fn record_result(&self, track_id: TrackId, label: impl Into<String>, probability: f32) {
        if let Some(handle) = self.get(track_id) {
            let mut state = lock(&handle);
            let (incarnation, generation) = (state.incarnation, state.generation);
            state.record(incarnation, generation, Classification::new(label, probability));
        }
    }

    /// Store the result of `job` unless a newer window of the same track already landed
    /// or the track was evicted since the window was taken.
    ///
    /// Returns whether the result was stored.
    pub fn record_job_result(&self, job: &ClassificationJob, classification: Classification) -> bool {
        match self.get(job.track_id) {
            Some(handle) => lock(&handle).record(job.incarnation, job.generation, classification),
            None => false,
        }
    }

    pub fn current_label(&self, track_id: TrackId) -> Option<Classification> {
        self.get(track_id)
            .and_then(|handle| lock(&handle).classification.clone())
    }

    pub fn buffer_len(&self, track_id: TrackId) -> Option<usize> {
        self.get(track_id).map(|handle| lock(&handle).len())
    }

    /// Drop tracks not observed within the TTL. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut tracks = self.write_map();
        let before = tracks.len();
        tracks.retain(|_, handle| now.saturating_duration_since(lock(handle).last_seen) < self.ttl);
        before - tracks.len()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TrackId, TrackHandle>> {
        self.tracks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TrackId, TrackHandle>> {
        self.tracks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Each operation leaves a track consistent, so a poisoned lock is still usable.
fn lock(handle: &Mutex<TrackState>) -> MutexGuard<'_, TrackState> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
