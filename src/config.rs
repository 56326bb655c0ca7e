//! Pipeline configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for [`ActionPipeline`](crate::ActionPipeline).
///
/// Every field has a default, so a JSON document only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Detector class id kept by the detection stage; everything else is dropped
    pub target_class_id: u32,
    /// Display name of the tracked kind, used in the `"<kind> #<id>"` label
    pub target_label: String,
    /// Minimum detector confidence
    pub detection_confidence: f32,
    /// Frames per classification window. This is both the classifier input length and
    /// the buffer length at which classification is triggered.
    pub clip_len: usize,
    /// Hard cap on a track's clip buffer
    pub window_size: usize,
    /// Observations kept after a classification fires
    pub retain_tail_len: usize,
    /// Side of the square every crop is resized to before buffering
    pub clip_size: u32,
    pub classification_workers: usize,
    /// Jobs waiting for a classification worker; further jobs are dropped
    pub classification_queue_capacity: usize,
    /// Capacity of each inter-stage queue
    pub stage_queue_capacity: usize,
    pub request_timeout_ms: u64,
    /// Track states not observed for this long are evicted
    pub track_ttl_ms: u64,
    /// Maximum number of track states held at once
    pub max_tracks: usize,
    pub eviction_sweep_interval_ms: u64,
    /// TrueType/OpenType font for label text. Boxes are still drawn without one.
    pub font_path: Option<PathBuf>,
    pub box_color: [u8; 3],
    pub box_thickness: u32,
    /// Label glyph height in pixels
    pub label_scale: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_class_id: 15,
            target_label: "Cat".to_string(),
            detection_confidence: 0.6,
            clip_len: 72,
            window_size: 72,
            retain_tail_len: 48,
            clip_size: 224,
            classification_workers: 1,
            classification_queue_capacity: 4,
            stage_queue_capacity: 8,
            request_timeout_ms: 5_000,
            track_ttl_ms: 10_000,
            max_tracks: 256,
            eviction_sweep_interval_ms: 1_000,
            font_path: None,
            box_color: [0, 255, 0],
            box_thickness: 2,
            label_scale: 16.0,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Defaults overridden by `CLIPTRACK_*` environment variables.
    ///
    /// Unset or unparsable variables keep the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            target_class_id: env_or("CLIPTRACK_TARGET_CLASS_ID", defaults.target_class_id),
            target_label: std::env::var("CLIPTRACK_TARGET_LABEL")
                .unwrap_or(defaults.target_label),
            detection_confidence: env_or(
                "CLIPTRACK_DETECTION_CONFIDENCE",
                defaults.detection_confidence,
            ),
            clip_len: env_or("CLIPTRACK_CLIP_LEN", defaults.clip_len),
            window_size: env_or("CLIPTRACK_WINDOW_SIZE", defaults.window_size),
            retain_tail_len: env_or("CLIPTRACK_RETAIN_TAIL_LEN", defaults.retain_tail_len),
            clip_size: env_or("CLIPTRACK_CLIP_SIZE", defaults.clip_size),
            classification_workers: env_or(
                "CLIPTRACK_CLASSIFICATION_WORKERS",
                defaults.classification_workers,
            ),
            classification_queue_capacity: env_or(
                "CLIPTRACK_CLASSIFICATION_QUEUE_CAPACITY",
                defaults.classification_queue_capacity,
            ),
            stage_queue_capacity: env_or(
                "CLIPTRACK_STAGE_QUEUE_CAPACITY",
                defaults.stage_queue_capacity,
            ),
            request_timeout_ms: env_or("CLIPTRACK_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            track_ttl_ms: env_or("CLIPTRACK_TRACK_TTL_MS", defaults.track_ttl_ms),
            max_tracks: env_or("CLIPTRACK_MAX_TRACKS", defaults.max_tracks),
            eviction_sweep_interval_ms: env_or(
                "CLIPTRACK_EVICTION_SWEEP_INTERVAL_MS",
                defaults.eviction_sweep_interval_ms,
            ),
            font_path: std::env::var_os("CLIPTRACK_FONT_PATH")
                .map(PathBuf::from)
                .or(defaults.font_path),
            box_color: defaults.box_color,
            box_thickness: env_or("CLIPTRACK_BOX_THICKNESS", defaults.box_thickness),
            label_scale: env_or("CLIPTRACK_LABEL_SCALE", defaults.label_scale),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            return Err(ConfigError::invalid(
                "detection_confidence",
                format!("{} is outside [0, 1]", self.detection_confidence),
            ));
        }
        if self.clip_len == 0 {
            return Err(ConfigError::invalid("clip_len", "must be at least 1"));
        }
        if self.window_size < self.clip_len {
            return Err(ConfigError::invalid(
                "window_size",
                format!(
                    "{} is smaller than clip_len {}",
                    self.window_size, self.clip_len
                ),
            ));
        }
        if self.retain_tail_len == 0 || self.retain_tail_len >= self.clip_len {
            return Err(ConfigError::invalid(
                "retain_tail_len",
                format!(
                    "{} must be in 1..{} (clip_len)",
                    self.retain_tail_len, self.clip_len
                ),
            ));
        }
        let non_zero = [
            ("clip_size", self.clip_size as u64),
            ("classification_workers", self.classification_workers as u64),
            (
                "classification_queue_capacity",
                self.classification_queue_capacity as u64,
            ),
            ("stage_queue_capacity", self.stage_queue_capacity as u64),
            ("request_timeout_ms", self.request_timeout_ms),
            ("track_ttl_ms", self.track_ttl_ms),
            ("max_tracks", self.max_tracks as u64),
            ("box_thickness", self.box_thickness as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.label_scale.is_nan() || self.label_scale <= 0.0 {
            return Err(ConfigError::invalid("label_scale", "must be positive"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn track_ttl(&self) -> Duration {
        Duration::from_millis(self.track_ttl_ms)
    }

    pub fn eviction_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_sweep_interval_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
