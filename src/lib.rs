//! Presence Watch
//!
//! Watches one video source (a stored file, a network stream or a local camera) for a target
//! object class and saves a rate-limited series of snapshot alerts.
//!
//! # Architecture
//!
//! One sequential loop per source, leaves first:
//!
//! - `ingest`: frame sources behind the `Source` trait, plus `SourceConnector` which owns the
//!   session and sequences frames
//! - `detect`: detector backends producing `DetectionResult`s
//! - `evaluate`: class/confidence policy deciding presence
//! - `throttle`: time- or frame-based minimum spacing between alerts
//! - `alert`: id allocation and JPEG artifact persistence
//! - `pipeline`: the `PipelineDriver` state machine tying them together
//!
//! Live sources are reconnected on failure; files end gracefully at end of stream. The
//! first qualifying detection always fires, and alert ids are `1..=n` with no gaps.
//!
//! ```no_run
//! use presence_watch::{ingest, AlertRecorder, CancellationToken, PipelineDriver, WatchConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let cfg = WatchConfig::load()?;
//! let descriptor = cfg.descriptor()?;
//! let source = ingest::open_source(&descriptor, &cfg.source_settings())?;
//! let recorder = AlertRecorder::new(cfg.recorder_config(descriptor.kind));
//! let summary = PipelineDriver::new(
//!     source,
//!     cfg.detection.build_backend()?,
//!     recorder,
//!     cfg.pipeline_settings(),
//!     CancellationToken::new(),
//! )
//! .run();
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod config;
pub mod detect;
pub mod error;
pub mod evaluate;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod throttle;
pub mod ui;

pub use alert::{AlertRecord, AlertRecorder, RecorderConfig};
pub use config::{DetectorKind, WatchConfig};
pub use detect::{Detection, DetectionResult, DetectorBackend, StubBackend};
pub use error::PipelineError;
pub use evaluate::{evaluate, Evaluation, PresencePolicy};
pub use frame::{Frame, RawFrame};
pub use ingest::{
    DeviceSource, FileSource, NetworkSource, Source, SourceDescriptor, SourceKind,
};
pub use overlay::{AlertContext, BannerAnnotator, FrameAnnotator, PlainAnnotator};
pub use pipeline::{
    CancellationToken, PipelineDriver, PipelineSettings, ReconnectPolicy, RunSummary,
    Termination,
};
pub use throttle::{AlertThrottle, ThrottleMarker, ThrottleMode};
