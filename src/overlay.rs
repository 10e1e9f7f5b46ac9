//! Alert annotation.
//!
//! Turning text into glyphs is left to whoever plugs in a richer `FrameAnnotator`; the
//! bundled annotators only pass pixels through or burn solid status bands.

use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::frame::Frame;

const ALERT_RED: Rgb<u8> = Rgb([255, 0, 0]);
const CLEAR_GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const STAMP_WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// What the annotation should convey for one frame.
#[derive(Clone, Debug)]
pub struct AlertContext<'a> {
    pub present: bool,
    /// Headline text, e.g. "Human Detected".
    pub headline: &'a str,
    /// Capture timestamp text.
    pub timestamp: &'a str,
}

/// Produces the image that gets persisted for an alert.
pub trait FrameAnnotator: Send {
    fn annotate(&self, frame: &Frame, context: &AlertContext<'_>) -> Result<RgbImage>;
}

/// Persists the frame as captured.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainAnnotator;

impl FrameAnnotator for PlainAnnotator {
    fn annotate(&self, frame: &Frame, _context: &AlertContext<'_>) -> Result<RgbImage> {
        frame.to_rgb_image()
    }
}

/// Burns a status band along the top edge (red when present, green otherwise) and a white
/// timestamp strip along the bottom edge.
#[derive(Clone, Copy, Debug)]
pub struct BannerAnnotator {
    /// Band height as a fraction of the frame height.
    pub band_ratio: f32,
}

impl Default for BannerAnnotator {
    fn default() -> Self {
        Self { band_ratio: 0.06 }
    }
}

impl FrameAnnotator for BannerAnnotator {
    fn annotate(&self, frame: &Frame, context: &AlertContext<'_>) -> Result<RgbImage> {
        let mut image = frame.to_rgb_image()?;
        let (width, height) = image.dimensions();
        let band = ((height as f32 * self.band_ratio).round() as u32).clamp(1, height.max(1));
        let status = if context.present {
            ALERT_RED
        } else {
            CLEAR_GREEN
        };

        for y in 0..band.min(height) {
            for x in 0..width {
                image.put_pixel(x, y, status);
            }
        }
        let stamp = (band / 2).max(1);
        for y in height.saturating_sub(stamp)..height {
            for x in 0..width {
                image.put_pixel(x, y, STAMP_WHITE);
            }
        }

        Ok(image)
    }
}
