use anyhow::{anyhow, Result};

/// Capture formats cameras hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    fn frame_len(self, width: u32, height: u32) -> Result<usize> {
        let bytes_per_pixel = match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Yuyv => 2,
        };
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(bytes_per_pixel))
            .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", self))
    }
}

/// Convert a captured buffer to tightly packed RGB24.
///
/// Drivers may hand back buffers longer than the image; trailing bytes are ignored.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = format.frame_len(width, height)?;
    let pixels = pixels.get(..expected).ok_or_else(|| {
        anyhow!(
            "{:?} frame too short: expected {}, got {}",
            format,
            expected,
            pixels.len()
        )
    })?;
    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width),
    }
}

fn yuyv_to_rgb(pixels: &[u8], width: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", width));
    }
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for quad in pixels.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_yuyv_is_gray() -> Result<()> {
        let yuyv = [128u8, 128, 128, 128, 128, 128, 128, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn yuyv_chroma_shifts_channels() -> Result<()> {
        // Strong V pushes red up and green down.
        let rgb = normalize_to_rgb(&[100, 128, 100, 200], 2, 1, PixelFormat::Yuyv)?;
        assert!(rgb[0] > 180);
        assert!(rgb[1] < 60);
        assert_eq!(rgb[2], 100);
        assert_eq!(&rgb[..3], &rgb[3..]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_trims_padding() -> Result<()> {
        let mut pixels = vec![1u8; 9];
        pixels.extend_from_slice(&[0, 0, 0]);
        let rgb = normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?;
        assert_eq!(rgb, vec![1u8; 9]);
        Ok(())
    }

    #[test]
    fn rejects_short_buffers_and_odd_yuyv() {
        assert!(normalize_to_rgb(&[0u8; 8], 1, 3, PixelFormat::Rgb24).is_err());
        assert!(normalize_to_rgb(&[0u8; 6], 3, 1, PixelFormat::Yuyv).is_err());
    }

    #[test]
    fn maps_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"RGB3"), Some(PixelFormat::Rgb24));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
