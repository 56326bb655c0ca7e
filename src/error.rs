//! Error types surfaced to callers of the pipeline.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors returned by [`ActionPipeline`](crate::ActionPipeline).
///
/// Per-frame stage failures never show up here: the detection, tracking and
/// classification stages recover locally. Only the outcome of the wait on a
/// request's own result channel is reported.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The frame did not come back before the request deadline. It may still be
    /// in flight and will update track state when it completes.
    #[error("frame {sequence} timed out after {waited:?}")]
    Timeout { sequence: u64, waited: Duration },

    /// The pipeline has been shut down and accepts no further frames.
    #[error("pipeline stopped")]
    Stopped,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to load label font: {0}")]
    Font(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl PipelineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors from loading or validating a [`PipelineConfig`](crate::PipelineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
