use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend turns one frame into zero or more class-labelled detections. The pipeline
/// treats it as a black box: it does not know about models, thresholds beyond its own
/// presence policy, or tracking.
///
/// Implementations receive the frame by shared reference and must not retain its pixels
/// beyond the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier, used in logs and the termination report.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// An `Err` skips the frame: the pipeline treats it as having no detections.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
