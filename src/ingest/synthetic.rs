//! Synthetic `stub://` streams.
//!
//! One generator backs the stub variant of every source kind. Its behaviour is driven by the
//! descriptor's query string:
//!
//! ```text
//! stub://front_door?frames=30&fps=10&present=5-30&width=64&height=48&refuse=2&drop_every=100
//! ```
//!
//! - `frames`: total frames before end-of-stream (unbounded when absent on live sources)
//! - `fps`: advertised frame rate
//! - `present`: 1-based frame range (`A-B` or `A`) carrying the subject
//! - `width` / `height`: frame size
//! - `refuse`: number of initial `open` calls that fail
//! - `drop_every`: fail the read after this many frames per session
//!
//! Frames inside the `present` range carry `PRESENCE_MARKER` in their first pixel, which is
//! what `StubBackend` looks for.

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use super::ReadOutcome;
use crate::frame::RawFrame;

/// First-pixel marker of synthetic frames that contain the subject.
pub const PRESENCE_MARKER: [u8; 3] = [255, 0, 255];

/// Default clip length of finite stubs with no `frames` parameter.
const DEFAULT_CLIP_FRAMES: u64 = 100;
/// Default advertised rate of finite stubs.
const DEFAULT_CLIP_FPS: f64 = 10.0;

#[derive(Clone, Debug, PartialEq)]
struct SyntheticSpec {
    frames: Option<u64>,
    fps: Option<f64>,
    present: Option<(u64, u64)>,
    width: u32,
    height: u32,
    refuse_opens: u32,
    drop_every: Option<u64>,
}

pub(crate) struct SyntheticStream {
    location: String,
    spec: SyntheticSpec,
    /// Frames produced across all sessions; the 1-based position of the last frame.
    position: u64,
    session_frames: u64,
    opens: u32,
    connected: bool,
}

impl SyntheticStream {
    /// Parse a `stub://` location. `finite` streams default to a bounded clip with a rate.
    pub(crate) fn parse(location: &str, width: u32, height: u32, finite: bool) -> Result<Self> {
        let url = Url::parse(location).with_context(|| format!("parse stub url {}", location))?;
        let mut spec = SyntheticSpec {
            frames: finite.then_some(DEFAULT_CLIP_FRAMES),
            fps: finite.then_some(DEFAULT_CLIP_FPS),
            present: None,
            width,
            height,
            refuse_opens: 0,
            drop_every: None,
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => spec.frames = Some(parse_number(&key, &value)?),
                "fps" => spec.fps = Some(parse_number(&key, &value)?),
                "present" => spec.present = Some(parse_range(&value)?),
                "width" => spec.width = parse_number(&key, &value)?,
                "height" => spec.height = parse_number(&key, &value)?,
                "refuse" => spec.refuse_opens = parse_number(&key, &value)?,
                "drop_every" => spec.drop_every = Some(parse_number(&key, &value)?),
                other => bail!("unknown stub parameter '{}'", other),
            }
        }
        if spec.width == 0 || spec.height == 0 {
            bail!("stub frames must have non-zero dimensions");
        }
        if spec.drop_every == Some(0) {
            bail!("drop_every must be at least 1");
        }

        Ok(Self {
            location: location.to_string(),
            spec,
            position: 0,
            session_frames: 0,
            opens: 0,
            connected: false,
        })
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        self.opens += 1;
        if self.opens <= self.spec.refuse_opens {
            bail!(
                "synthetic source refused connection ({}/{})",
                self.opens,
                self.spec.refuse_opens
            );
        }
        self.connected = true;
        self.session_frames = 0;
        log::info!("SyntheticStream: connected to {}", self.location);
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<ReadOutcome> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} is not connected", self.location));
        }
        if self.spec.frames.is_some_and(|total| self.position >= total) {
            return Ok(ReadOutcome::EndOfStream);
        }
        if self
            .spec
            .drop_every
            .is_some_and(|limit| self.session_frames >= limit)
        {
            self.connected = false;
            bail!("synthetic stream dropped after {} frames", self.session_frames);
        }

        self.position += 1;
        self.session_frames += 1;
        let pixels = self.generate_pixels();
        Ok(ReadOutcome::Frame(RawFrame::new(
            pixels,
            self.spec.width,
            self.spec.height,
        )?))
    }

    pub(crate) fn close(&mut self) {
        self.connected = false;
    }

    pub(crate) fn frame_rate(&self) -> Option<f64> {
        self.spec.fps
    }

    fn is_present(&self, position: u64) -> bool {
        self.spec
            .present
            .is_some_and(|(first, last)| (first..=last).contains(&position))
    }

    /// Background pattern that never produces the marker, plus the marker when present.
    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.spec.width as usize) * (self.spec.height as usize) * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.position) % 251) as u8;
        }
        if self.is_present(self.position) {
            pixels[..PRESENCE_MARKER.len()].copy_from_slice(&PRESENCE_MARKER);
        }
        pixels
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter '{}' has invalid value '{}'", key, value))
}

fn parse_range(value: &str) -> Result<(u64, u64)> {
    let (first, last) = match value.split_once('-') {
        Some((first, last)) => (
            parse_number("present", first)?,
            parse_number("present", last)?,
        ),
        None => {
            let single = parse_number("present", value)?;
            (single, single)
        }
    };
    if first == 0 || last < first {
        bail!("stub parameter 'present' must be a 1-based range A-B with A <= B");
    }
    Ok((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_of(stream: &mut SyntheticStream) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        loop {
            match stream.read()? {
                ReadOutcome::Frame(frame) => out.push(frame.pixels().to_vec()),
                ReadOutcome::EndOfStream => return Ok(out),
            }
        }
    }

    #[test]
    fn finite_stub_ends_and_marks_presence() -> Result<()> {
        let mut stream =
            SyntheticStream::parse("stub://clip?frames=6&present=2-3&width=2&height=2", 0, 0, true)?;
        stream.open()?;

        let frames = frames_of(&mut stream)?;
        assert_eq!(frames.len(), 6);
        let marked: Vec<bool> = frames
            .iter()
            .map(|pixels| pixels.starts_with(&PRESENCE_MARKER))
            .collect();
        assert_eq!(marked, vec![false, true, true, false, false, false]);
        assert_eq!(stream.frame_rate(), Some(DEFAULT_CLIP_FPS));
        Ok(())
    }

    #[test]
    fn live_stub_refuses_then_drops() -> Result<()> {
        let mut stream =
            SyntheticStream::parse("stub://cam?refuse=2&drop_every=3&width=2&height=2", 0, 0, false)?;
        assert!(stream.open().is_err());
        assert!(stream.open().is_err());
        stream.open()?;

        for _ in 0..3 {
            assert!(matches!(stream.read()?, ReadOutcome::Frame(_)));
        }
        assert!(stream.read().is_err());
        assert!(stream.read().is_err(), "dropped stream stays disconnected");

        stream.open()?;
        assert!(matches!(stream.read()?, ReadOutcome::Frame(_)));
        assert_eq!(stream.frame_rate(), None);
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticStream::parse("stub://x?present=0-3", 2, 2, true).is_err());
        assert!(SyntheticStream::parse("stub://x?present=5-3", 2, 2, true).is_err());
        assert!(SyntheticStream::parse("stub://x?frames=many", 2, 2, true).is_err());
        assert!(SyntheticStream::parse("stub://x?colour=red", 2, 2, true).is_err());
    }
}
