//! HTTP MJPEG/JPEG network streams.
//!
//! A `multipart/*` response is read as a continuous MJPEG stream; anything else is treated as
//! a snapshot endpoint and polled with one GET per frame.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use image::GenericImageView;

use super::ReadOutcome;
use crate::frame::RawFrame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct MjpegSource {
    url: String,
    target_fps: u32,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    pub(crate) fn new(url: &str, target_fps: u32) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            url: url.to_string(),
            target_fps,
            agent,
            stream: None,
            last_frame_at: None,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to http stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.last_frame_at = None;
        log::info!("NetworkSource: connected to {} (http)", self.url);
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<ReadOutcome> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http source {} is not connected", self.url))?;
        let min_interval = frame_interval(self.target_fps);
        loop {
            let jpeg_bytes = match stream {
                HttpStream::Mjpeg(stream) => stream.read_next_jpeg()?,
                HttpStream::SingleJpeg => {
                    // Snapshots are fetched on demand: wait out the interval first.
                    let wait = remaining_interval(self.last_frame_at, Instant::now(), min_interval);
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    fetch_single_jpeg(&self.agent, &self.url)?
                }
            };
            let Some(jpeg_bytes) = jpeg_bytes else {
                return Ok(ReadOutcome::EndOfStream);
            };

            let now = Instant::now();
            if !remaining_interval(self.last_frame_at, now, min_interval).is_zero() {
                continue;
            }

            let (pixels, width, height) = decode_jpeg(&jpeg_bytes)?;
            self.last_frame_at = Some(now);
            return Ok(ReadOutcome::Frame(RawFrame::new(pixels, width, height)?));
        }
    }

    pub(crate) fn close(&mut self) {
        self.stream = None;
    }

    pub(crate) fn frame_rate(&self) -> Option<f64> {
        (self.target_fps > 0).then_some(f64::from(self.target_fps))
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` when the server closed the stream.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Option<Vec<u8>>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(Some(bytes))
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    Ok((image.into_rgb8().into_raw(), width, height))
}

/// Byte range of the first complete SOI..EOI JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|pair| pair == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|pair| pair == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

/// Time left before the next frame may be accepted.
fn remaining_interval(last: Option<Instant>, now: Instant, min_interval: Duration) -> Duration {
    match last {
        Some(last) => min_interval.saturating_sub(now.saturating_duration_since(last)),
        None => Duration::ZERO,
    }
}
