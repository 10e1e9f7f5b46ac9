use chrono::Local;

use super::{ReadOutcome, Source, SourceKind};
use crate::error::PipelineError;
use crate::frame::Frame;

/// Lifecycle of the single session a connector owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// What the connector produced for one read.
pub enum StreamEvent {
    Frame(Frame),
    EndOfStream,
}

/// Owns one source session and sequences its frames.
///
/// Frame indices keep increasing across reconnects, so they are unique for the lifetime of
/// the pipeline. A live source that reports end-of-stream is surfaced as a read failure:
/// only finite sources end gracefully.
pub struct SourceConnector {
    source: Box<dyn Source>,
    state: SessionState,
    last_index: u64,
    sessions: u64,
}

impl SourceConnector {
    pub fn new(source: Box<dyn Source>) -> Self {
        Self {
            source,
            state: SessionState::Disconnected,
            last_index: 0,
            sessions: 0,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn location(&self) -> &str {
        self.source.location()
    }

    pub fn is_unbounded(&self) -> bool {
        self.source.is_unbounded()
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.source.frame_rate()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sessions opened successfully so far.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    pub fn open(&mut self) -> Result<(), PipelineError> {
        if self.state == SessionState::Connected {
            return Ok(());
        }
        self.state = SessionState::Connecting;
        match self.source.open() {
            Ok(()) => {
                self.state = SessionState::Connected;
                self.sessions += 1;
                Ok(())
            }
            Err(err) => {
                self.source.close();
                self.state = SessionState::Failed;
                Err(PipelineError::source_open(self.source.location(), err))
            }
        }
    }

    pub fn read(&mut self) -> Result<StreamEvent, PipelineError> {
        if self.state != SessionState::Connected {
            return Err(PipelineError::frame_read(
                self.source.location(),
                "session is not connected",
            ));
        }
        match self.source.read() {
            Ok(ReadOutcome::Frame(raw)) => {
                self.last_index += 1;
                Ok(StreamEvent::Frame(Frame::from_parts(
                    raw,
                    self.last_index,
                    Local::now(),
                )))
            }
            Ok(ReadOutcome::EndOfStream) if self.source.is_unbounded() => {
                self.state = SessionState::Failed;
                Err(PipelineError::frame_read(
                    self.source.location(),
                    "live stream ended",
                ))
            }
            Ok(ReadOutcome::EndOfStream) => Ok(StreamEvent::EndOfStream),
            Err(err) => {
                self.state = SessionState::Failed;
                Err(PipelineError::frame_read(self.source.location(), err))
            }
        }
    }

    /// Release the session. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Disconnected {
            self.source.close();
            self.state = SessionState::Disconnected;
        }
    }
}

impl Drop for SourceConnector {
    fn drop(&mut self) {
        self.close();
    }
}
