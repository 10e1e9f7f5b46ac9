//! Frame sources.
//!
//! This module provides the sources a watch pipeline can consume:
//! - Local video files (finite; decoding behind feature: ingest-file-ffmpeg)
//! - Network streams: RTSP (feature: rtsp-gstreamer) and HTTP MJPEG (feature: ingest-mjpeg)
//! - Local cameras via V4L2 (feature: ingest-v4l2)
//! - `stub://` synthetic variants of each, always available
//!
//! Every source implements `Source`. The kind is fixed when the descriptor is classified:
//! files are finite, network streams and cameras are unbounded and get reconnected by the
//! pipeline when they fail.
//!
//! Sources hand out `RawFrame`s only; `SourceConnector` owns the session and stamps each
//! frame with its sequence index and capture time.

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

mod connector;
pub mod device;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-mjpeg")]
pub(crate) mod mjpeg;
pub mod network;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod synthetic;

pub use connector::{SessionState, SourceConnector, StreamEvent};
pub use device::{DeviceConfig, DeviceSource};
pub use file::{FileConfig, FileSource};
pub use network::{NetworkConfig, NetworkSource};
pub use synthetic::PRESENCE_MARKER;

use crate::frame::RawFrame;

/// Outcome of one read from a source backend.
pub enum ReadOutcome {
    Frame(RawFrame),
    EndOfStream,
}

/// A media source the pipeline can open, read and close.
///
/// `open` may be called again after `close` (or after a failed `read`) to reconnect.
pub trait Source: Send {
    fn kind(&self) -> SourceKind;

    /// Human-readable location (path, URL or device node).
    fn location(&self) -> &str;

    fn open(&mut self) -> Result<()>;

    /// Block until the next frame, the end of the stream, or a failure.
    fn read(&mut self) -> Result<ReadOutcome>;

    /// Release the session. Must be safe to call when nothing is open.
    fn close(&mut self);

    fn is_unbounded(&self) -> bool {
        self.kind().is_unbounded()
    }

    /// Native frame rate, when the source knows it.
    fn frame_rate(&self) -> Option<f64> {
        None
    }
}

/// Source classification, decided once at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A stored file: finite and reliable.
    File,
    /// A network stream (RTSP, HTTP MJPEG): unbounded, may drop.
    Network,
    /// A local camera: unbounded, may drop.
    Device,
}

impl SourceKind {
    pub fn is_unbounded(self) -> bool {
        !matches!(self, SourceKind::File)
    }

    /// Default artifact subdirectory for alerts from this kind of source.
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Network => "network",
            SourceKind::Device => "device",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" | "video" => Ok(SourceKind::File),
            "network" | "stream" | "rtsp" => Ok(SourceKind::Network),
            "device" | "camera" | "webcam" => Ok(SourceKind::Device),
            other => Err(anyhow!(
                "unknown source kind '{}'; expected file, network or device",
                other
            )),
        }
    }
}

const NETWORK_SCHEMES: &[&str] = &["rtsp", "rtsps", "http", "https"];
const STUB_SCHEME: &str = "stub";

/// A classified source descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub location: String,
}

impl SourceDescriptor {
    /// Classify a raw descriptor:
    /// - a bare integer is a camera index (`0` → `/dev/video0`)
    /// - `/dev/video*` is a camera
    /// - `rtsp://`, `rtsps://`, `http://`, `https://` are network streams
    /// - `stub://` is a synthetic file
    /// - anything else without a scheme is a file path
    pub fn classify(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("source descriptor is empty"));
        }
        if let Ok(index) = raw.parse::<u32>() {
            return Ok(Self::new(SourceKind::Device, format!("/dev/video{}", index)));
        }
        if raw.starts_with("/dev/video") {
            return Ok(Self::new(SourceKind::Device, raw));
        }
        match scheme_of(raw) {
            Some(scheme) if NETWORK_SCHEMES.contains(&scheme.as_str()) => {
                Ok(Self::new(SourceKind::Network, raw))
            }
            Some(scheme) if scheme == STUB_SCHEME => Ok(Self::new(SourceKind::File, raw)),
            Some(scheme) => Err(anyhow!("unsupported source scheme '{}'", scheme)),
            None => Ok(Self::new(SourceKind::File, raw)),
        }
    }

    /// Force a kind, e.g. to run a `stub://` descriptor as a live source.
    pub fn with_kind(kind: SourceKind, raw: &str) -> Result<Self> {
        let classified = Self::classify(raw)?;
        Ok(Self::new(kind, classified.location))
    }

    fn new(kind: SourceKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
        }
    }
}

pub(crate) fn scheme_of(location: &str) -> Option<String> {
    location
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
}

pub(crate) fn is_stub(location: &str) -> bool {
    scheme_of(location).as_deref() == Some(STUB_SCHEME)
}

/// Capture parameters shared by all source kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// Requested capture width (cameras, synthetic sources).
    pub width: u32,
    /// Requested capture height (cameras, synthetic sources).
    pub height: u32,
    /// Decimate live sources to this rate. 0 keeps every frame.
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            target_fps: 0,
        }
    }
}

/// Build the source for a classified descriptor.
pub fn open_source(
    descriptor: &SourceDescriptor,
    settings: &SourceSettings,
) -> Result<Box<dyn Source>> {
    let source: Box<dyn Source> = match descriptor.kind {
        SourceKind::File => Box::new(FileSource::new(FileConfig {
            path: descriptor.location.clone(),
            width: settings.width,
            height: settings.height,
        })?),
        SourceKind::Network => Box::new(NetworkSource::new(NetworkConfig {
            url: descriptor.location.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        })?),
        SourceKind::Device => Box::new(DeviceSource::new(DeviceConfig {
            device: descriptor.location.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        })?),
    };
    Ok(source)
}
