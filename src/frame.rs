//! Frames flowing through the pipeline.
//!
//! - `RawFrame`: decoded RGB24 pixels as handed over by a source backend.
//! - `Frame`: a `RawFrame` stamped by the connector with its sequence index and capture time.
//!
//! Frames are consumed within one loop iteration. Only the recorder keeps anything beyond
//! that, and it keeps the encoded artifact, not the frame.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::time::Instant;

/// Timestamp format used for overlays and artifact names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Decoded RGB24 pixels, before sequencing.
pub struct RawFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    /// Wrap RGB24 pixels. The buffer length must be `width * height * 3`.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// One sequenced frame.
///
/// There is no mutable access to the pixels: detectors and annotators read them, and the
/// annotator produces a separate image for persistence.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based sequence index, strictly increasing for the pipeline's lifetime.
    pub index: u64,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Local>,
    capture_instant: Instant,
}

impl Frame {
    /// Stamp a raw frame. The connector is the only caller inside a pipeline.
    pub fn from_parts(raw: RawFrame, index: u64, captured_at: DateTime<Local>) -> Self {
        Self {
            pixels: raw.pixels,
            width: raw.width,
            height: raw.height,
            index,
            captured_at,
            capture_instant: Instant::now(),
        }
    }

    /// Read-only RGB24 pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Monotonic capture instant, used by the time-based throttle.
    pub fn capture_instant(&self) -> Instant {
        self.capture_instant
    }

    /// Capture time formatted with `TIMESTAMP_FORMAT`.
    pub fn timestamp(&self) -> String {
        self.captured_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Copy the pixels into an owned image.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}
