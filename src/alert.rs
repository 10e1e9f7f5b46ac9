//! Alert persistence.
//!
//! `AlertRecorder` allocates alert ids and writes one JPEG artifact per fired alert:
//!
//! ```text
//! <root>/<source_label>/human_<id>[_<sanitized timestamp>].jpg
//! ```
//!
//! Ids start at 1 and only advance when the artifact is on disk, so the persisted ids of a
//! run are always `1..=n` with no gaps even when some writes fail.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::PipelineError;
use crate::frame::Frame;

pub const DEFAULT_ALERTS_ROOT: &str = "alerts";
const ARTIFACT_PREFIX: &str = "human";
const JPEG_QUALITY: u8 = 90;

/// Where and how artifacts are named.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecorderConfig {
    pub root: PathBuf,
    /// Subdirectory under `root`, one per source.
    pub source_label: String,
    /// Append the sanitized capture timestamp to artifact names.
    pub stamp_filenames: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ALERTS_ROOT),
            source_label: "file".to_string(),
            stamp_filenames: false,
        }
    }
}

/// A persisted alert. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertRecord {
    pub id: u64,
    pub frame_index: u64,
    pub captured_at: DateTime<Local>,
    pub path: PathBuf,
    /// Detections that satisfied the presence policy on the fired frame.
    pub matches: usize,
}

pub struct AlertRecorder {
    dir: PathBuf,
    stamp_filenames: bool,
    last_id: u64,
    dir_ready: bool,
}

impl AlertRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            dir: config.root.join(&config.source_label),
            stamp_filenames: config.stamp_filenames,
            last_id: 0,
            dir_ready: false,
        }
    }

    /// Directory artifacts are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of alerts persisted so far (also the id of the latest one).
    pub fn persisted(&self) -> u64 {
        self.last_id
    }

    /// Artifact path for `id` captured at `captured_at`. Deterministic in its inputs.
    pub fn artifact_path(&self, id: u64, captured_at: &DateTime<Local>) -> PathBuf {
        let name = if self.stamp_filenames {
            let stamp = captured_at.format(crate::frame::TIMESTAMP_FORMAT).to_string();
            format!("{}_{}_{}.jpg", ARTIFACT_PREFIX, id, sanitize_for_filename(&stamp))
        } else {
            format!("{}_{}.jpg", ARTIFACT_PREFIX, id)
        };
        self.dir.join(name)
    }

    /// Persist `annotated` as the next alert for `frame`.
    ///
    /// On failure the id is not consumed: the next successful record reuses it.
    pub fn record(
        &mut self,
        frame: &Frame,
        annotated: &RgbImage,
        matches: usize,
    ) -> Result<AlertRecord, PipelineError> {
        let id = self.last_id + 1;
        let path = self.artifact_path(id, &frame.captured_at);

        self.ensure_dir()
            .map_err(|err| PipelineError::persistence(&path, err))?;
        let bytes = encode_jpeg(annotated).map_err(|err| PipelineError::persistence(&path, err))?;
        fs::write(&path, bytes).map_err(|err| PipelineError::persistence(&path, err))?;

        self.last_id = id;
        Ok(AlertRecord {
            id,
            frame_index: frame.index,
            captured_at: frame.captured_at,
            path,
            matches,
        })
    }

    fn ensure_dir(&mut self) -> std::io::Result<()> {
        if !self.dir_ready {
            fs::create_dir_all(&self.dir)?;
            self.dir_ready = true;
        }
        Ok(())
    }
}

fn encode_jpeg(image: &RgbImage) -> image::ImageResult<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode_image(image)?;
    Ok(bytes.into_inner())
}

/// Replace characters that are illegal in file names on common platforms with `-` and
/// whitespace with `_`.
pub fn sanitize_for_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() => '_',
            c if c.is_control() => '-',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawFrame;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 1, 9, 30, 15)
            .single()
            .expect("unambiguous local time")
    }

    fn frame(index: u64) -> Frame {
        let raw = RawFrame::new(vec![128u8; 4 * 4 * 3], 4, 4).unwrap();
        Frame::from_parts(raw, index, fixed_time())
    }

    fn recorder(root: &Path, stamp_filenames: bool) -> AlertRecorder {
        AlertRecorder::new(RecorderConfig {
            root: root.to_path_buf(),
            source_label: "webcam".to_string(),
            stamp_filenames,
        })
    }

    #[test]
    fn sanitizes_timestamps() {
        assert_eq!(
            sanitize_for_filename("2024-05-01 09:30:15"),
            "2024-05-01_09-30-15"
        );
        assert_eq!(sanitize_for_filename("a/b\\c*d?e"), "a-b-c-d-e");
    }

    #[test]
    fn artifact_names_are_deterministic() {
        let root = Path::new("alerts");
        assert_eq!(
            recorder(root, false).artifact_path(3, &fixed_time()),
            PathBuf::from("alerts/webcam/human_3.jpg")
        );
        assert_eq!(
            recorder(root, true).artifact_path(3, &fixed_time()),
            PathBuf::from("alerts/webcam/human_3_2024-05-01_09-30-15.jpg")
        );
    }

    #[test]
    fn records_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder(dir.path(), false);

        for (expected, index) in [(1u64, 5u64), (2, 15), (3, 25)] {
            let frame = frame(index);
            let image = frame.to_rgb_image().unwrap();
            let record = recorder.record(&frame, &image, 1).unwrap();
            assert_eq!(record.id, expected);
            assert_eq!(record.frame_index, index);
            assert!(record.path.exists());
        }
        assert_eq!(recorder.persisted(), 3);
    }

    #[test]
    fn failed_write_does_not_consume_id() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the label directory should be.
        let blocked = dir.path().join("webcam");
        fs::write(&blocked, b"not a directory").unwrap();

        let mut recorder = recorder(dir.path(), false);
        let frame = frame(1);
        let image = frame.to_rgb_image().unwrap();

        let err = recorder.record(&frame, &image, 1).unwrap_err();
        assert!(matches!(err, PipelineError::Persistence { .. }));
        assert_eq!(recorder.persisted(), 0);

        fs::remove_file(&blocked).unwrap();
        let record = recorder.record(&frame, &image, 1).unwrap();
        assert_eq!(record.id, 1);
    }
}
