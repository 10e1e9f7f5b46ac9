//! Error taxonomy for the alert-capture pipeline.
//!
//! Sources, backends and the binary work in `anyhow::Result`. The driver converts those
//! failures into `PipelineError` so it can decide between retrying, skipping and terminating.

use std::path::PathBuf;

use thiserror::Error;

/// Errors observed while running a watch pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not be opened.
    #[error("failed to open source {location}: {reason}")]
    SourceOpen {
        /// Source location (path, URL or device).
        location: String,
        /// Underlying failure.
        reason: String,
    },

    /// The source failed while delivering a frame.
    #[error("failed to read frame from {location}: {reason}")]
    FrameRead {
        /// Source location (path, URL or device).
        location: String,
        /// Underlying failure.
        reason: String,
    },

    /// The detector could not produce a result for a frame.
    #[error("detector {backend} failed on frame {frame_index}: {reason}")]
    Detector {
        /// Backend name.
        backend: &'static str,
        /// Sequence index of the skipped frame.
        frame_index: u64,
        /// Underlying failure.
        reason: String,
    },

    /// An alert artifact could not be written.
    #[error("failed to persist alert to {}: {reason}", path.display())]
    Persistence {
        /// Artifact path that was being written.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// Reconnect attempts for a live source ran out.
    #[error("gave up on {location} after {attempts} failed connection attempts")]
    ReconnectExhausted {
        /// Source location.
        location: String,
        /// Consecutive failed attempts.
        attempts: u32,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Creates a source open error from any displayable failure.
    pub fn source_open(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::SourceOpen {
            location: location.into(),
            reason: format!("{reason:#}"),
        }
    }

    /// Creates a frame read error from any displayable failure.
    pub fn frame_read(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::FrameRead {
            location: location.into(),
            reason: format!("{reason:#}"),
        }
    }

    /// Creates a detector error.
    pub fn detector(
        backend: &'static str,
        frame_index: u64,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Detector {
            backend,
            frame_index,
            reason: format!("{reason:#}"),
        }
    }

    /// Creates a persistence error.
    pub fn persistence(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: format!("{reason:#}"),
        }
    }

    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// True for errors a live source recovers from by reconnecting.
    pub fn is_source_failure(&self) -> bool {
        matches!(self, Self::SourceOpen { .. } | Self::FrameRead { .. })
    }
}
