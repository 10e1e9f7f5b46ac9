use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, DetectionResult, PERSON_CLASS_ID};
use crate::frame::Frame;
use crate::ingest::PRESENCE_MARKER;

/// Confidence reported by `StubBackend::new` for marked frames.
pub const STUB_CONFIDENCE: f32 = 0.85;

/// Stub backend for testing and demos.
///
/// Synthetic `stub://` sources burn `PRESENCE_MARKER` into the first pixel of frames that
/// contain the subject; this backend reports one detection for those frames and nothing for
/// the rest.
pub struct StubBackend {
    class_id: u32,
    confidence: f32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            class_id: PERSON_CLASS_ID,
            confidence: STUB_CONFIDENCE,
        }
    }

    /// Report detections with a different class and confidence.
    pub fn reporting(class_id: u32, confidence: f32) -> Self {
        Self {
            class_id,
            confidence,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        if !frame.pixels().starts_with(&PRESENCE_MARKER) {
            return Ok(DetectionResult::default());
        }

        Ok(DetectionResult::new(vec![Detection::new(
            self.class_id,
            self.confidence,
            BoundingBox {
                x: 0.25,
                y: 0.25,
                w: 0.5,
                h: 0.5,
            },
        )]))
    }
}
