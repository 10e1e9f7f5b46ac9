//! Local camera frame source.
//!
//! `DeviceSource` captures from a V4L2 device node (feature: ingest-v4l2), or from a
//! `stub://` synthetic camera. Cameras are unbounded: a failed capture is a read failure and
//! the pipeline reopens the device.

use anyhow::{anyhow, Result};
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

#[cfg(feature = "ingest-v4l2")]
use super::normalize::{normalize_to_rgb, PixelFormat};
use super::synthetic::SyntheticStream;
use super::{is_stub, ReadOutcome, Source, SourceKind};
#[cfg(feature = "ingest-v4l2")]
use crate::frame::RawFrame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Device path (e.g., "/dev/video0").
    pub device: String,
    /// Requested capture rate. 0 keeps the driver default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 0,
            width: 1280,
            height: 720,
        }
    }
}

/// Camera frame source.
pub struct DeviceSource {
    device: String,
    backend: DeviceBackend,
}

enum DeviceBackend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Camera),
}

impl DeviceSource {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let backend = if is_stub(&config.device) {
            DeviceBackend::Synthetic(SyntheticStream::parse(
                &config.device,
                config.width,
                config.height,
                false,
            )?)
        } else if config.device.contains("://") {
            return Err(anyhow!(
                "camera sources take a device path, got '{}'",
                config.device
            ));
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                DeviceBackend::V4l2(V4l2Camera::new(&config))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                return Err(anyhow!("camera capture requires the ingest-v4l2 feature"));
            }
        };
        Ok(Self {
            device: config.device,
            backend,
        })
    }
}

impl Source for DeviceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Device
    }

    fn location(&self) -> &str {
        &self.device
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            DeviceBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(source) => source.open(),
        }
    }

    fn read(&mut self) -> Result<ReadOutcome> {
        match &mut self.backend {
            DeviceBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(source) => source.read(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            DeviceBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(source) => source.close(),
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        match &self.backend {
            DeviceBackend::Synthetic(source) => source.frame_rate(),
            #[cfg(feature = "ingest-v4l2")]
            DeviceBackend::V4l2(source) => source.frame_rate,
        }
    }
}

// ----------------------------------------------------------------------------
// V4L2 capture
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct V4l2Camera {
    config: DeviceConfig,
    state: Option<V4l2State>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_rate: Option<f64>,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl V4l2Camera {
    fn new(config: &DeviceConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config: config.clone(),
            state: None,
            format: PixelFormat::Rgb24,
            frame_rate: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.close();
        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "DeviceSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "device {} only offers unsupported pixel format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "DeviceSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }
        self.frame_rate = device.params().ok().and_then(|params| {
            let interval = params.interval;
            (interval.numerator > 0)
                .then(|| f64::from(interval.denominator) / f64::from(interval.numerator))
        });

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "DeviceSource: connected to {} ({}x{} {:?}, {:?} fps)",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format,
            self.frame_rate
        );
        Ok(())
    }

    fn read(&mut self) -> Result<ReadOutcome> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(
                &buf[..used],
                self.active_width,
                self.active_height,
                self.format,
            )
        })?;
        Ok(ReadOutcome::Frame(RawFrame::new(
            pixels,
            self.active_width,
            self.active_height,
        )?))
    }

    fn close(&mut self) {
        self.state = None;
    }
}
