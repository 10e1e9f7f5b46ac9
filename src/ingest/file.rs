//! Local file frame source.
//!
//! `FileSource` reads frames from a stored video. Files are finite: end-of-stream is the
//! normal way a file pipeline finishes, and any open or read failure is fatal for the run.
//!
//! Paths with a URL scheme are rejected, except `stub://` which selects the synthetic clip.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::SyntheticStream;
use super::{is_stub, ReadOutcome, Source, SourceKind};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "sample/input8.mp4").
    pub path: String,
    /// Frame width for synthetic clips.
    pub width: u32,
    /// Frame height for synthetic clips.
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            width: 640,
            height: 480,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if is_stub(&config.path) {
            FileBackend::Synthetic(SyntheticStream::parse(
                &config.path,
                config.width,
                config.height,
                true,
            )?)
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFileSource::new(&config.path))
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                return Err(anyhow!(
                    "file ingestion requires the ingest-file-ffmpeg feature"
                ));
            }
        };
        Ok(Self {
            path: config.path,
            backend,
        })
    }
}

impl Source for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn location(&self) -> &str {
        &self.path
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.open(),
        }
    }

    fn read(&mut self) -> Result<ReadOutcome> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.read(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.close(),
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        match &self.backend {
            FileBackend::Synthetic(source) => source.frame_rate(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_rate(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if is_stub(path) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(path: &str) -> FileConfig {
        FileConfig {
            path: path.to_string(),
            width: 8,
            height: 6,
        }
    }

    #[test]
    fn file_source_rejects_urls() {
        assert!(FileSource::new(stub_config("rtsp://camera/stream")).is_err());
        assert!(FileSource::new(stub_config("  ")).is_err());
    }

    #[test]
    fn file_source_is_finite() -> Result<()> {
        let mut source = FileSource::new(stub_config("stub://clip?frames=2&fps=25"))?;
        assert_eq!(source.kind(), SourceKind::File);
        assert!(!source.is_unbounded());
        assert_eq!(source.frame_rate(), Some(25.0));

        source.open()?;
        match source.read()? {
            ReadOutcome::Frame(frame) => {
                assert_eq!((frame.width, frame.height), (8, 6));
            }
            ReadOutcome::EndOfStream => panic!("expected a frame"),
        }
        assert!(matches!(source.read()?, ReadOutcome::Frame(_)));
        assert!(matches!(source.read()?, ReadOutcome::EndOfStream));
        Ok(())
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn real_files_need_ffmpeg() {
        assert!(FileSource::new(stub_config("sample/input8.mp4")).is_err());
    }
}
