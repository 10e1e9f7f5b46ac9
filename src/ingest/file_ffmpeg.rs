//! Local file decoding using FFmpeg.
//!
//! The container is opened in `open` so a missing or unreadable file surfaces as an open
//! failure. Decoded frames are converted to RGB24 in memory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::ReadOutcome;
use crate::frame::RawFrame;

struct Session {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    /// EOF has been sent to the decoder; only buffered frames remain.
    flushed: bool,
}

pub(crate) struct FfmpegFileSource {
    path: String,
    session: Option<Session>,
    frame_rate: Option<f64>,
    frame_count: u64,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            session: None,
            frame_rate: None,
            frame_count: 0,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&self.path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", self.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        self.frame_rate = (rate.denominator() != 0 && rate.numerator() > 0)
            .then(|| f64::from(rate.numerator()) / f64::from(rate.denominator()));

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        self.session = Some(Session {
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
        });
        self.frame_count = 0;
        log::info!(
            "FileSource: opened {} (ffmpeg, {:?} fps)",
            self.path,
            self.frame_rate
        );
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<ReadOutcome> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("file {} is not open", self.path))?;

        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if session.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                session
                    .scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                self.frame_count += 1;
                return Ok(ReadOutcome::Frame(RawFrame::new(pixels, width, height)?));
            }
            if session.flushed {
                log::info!(
                    "FileSource: {} ended after {} frames",
                    self.path,
                    self.frame_count
                );
                return Ok(ReadOutcome::EndOfStream);
            }

            let stream_index = session.stream_index;
            let next = session
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index);
            match next {
                Some((_, packet)) => session
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    session
                        .decoder
                        .send_eof()
                        .context("flush ffmpeg decoder")?;
                    session.flushed = true;
                }
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.session = None;
    }

    pub(crate) fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
