use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use image::RgbImage;

use presence_watch::detect::{DetectionResult, DetectorBackend, StubBackend};
use presence_watch::ingest::{self, ReadOutcome, SourceDescriptor, SourceSettings, PRESENCE_MARKER};
use presence_watch::{
    AlertContext, AlertRecord, AlertRecorder, CancellationToken, Frame, FrameAnnotator,
    PipelineDriver, PipelineError, PipelineSettings, RawFrame, ReconnectPolicy, RecorderConfig,
    RunSummary, Source, SourceKind, Termination,
};

#[derive(Clone, Copy, Debug)]
enum Step {
    Frame { present: bool },
    ReadFailure,
    End,
}

/// Source driven by a fixed script of open outcomes and read steps.
struct ScriptedSource {
    kind: SourceKind,
    frame_rate: Option<f64>,
    /// Outcome of each `open` call in order; opens succeed once this runs out.
    opens: VecDeque<bool>,
    steps: VecDeque<Step>,
    open_calls: Arc<AtomicUsize>,
    /// Cancelled when a live script runs out.
    on_exhausted: Option<CancellationToken>,
    connected: bool,
}

impl ScriptedSource {
    fn new(kind: SourceKind, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            kind,
            frame_rate: None,
            opens: VecDeque::new(),
            steps: steps.into_iter().collect(),
            open_calls: Arc::new(AtomicUsize::new(0)),
            on_exhausted: None,
            connected: false,
        }
    }

    fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    fn with_opens(mut self, opens: impl IntoIterator<Item = bool>) -> Self {
        self.opens = opens.into_iter().collect();
        self
    }

    fn cancelling(mut self, cancel: &CancellationToken) -> Self {
        self.on_exhausted = Some(cancel.clone());
        self
    }
}

fn raw_frame(present: bool) -> RawFrame {
    let mut pixels = vec![7u8; 2 * 2 * 3];
    if present {
        pixels[..3].copy_from_slice(&PRESENCE_MARKER);
    }
    RawFrame::new(pixels, 2, 2).unwrap()
}

impl Source for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn location(&self) -> &str {
        "scripted://source"
    }

    fn open(&mut self) -> Result<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.opens.pop_front().unwrap_or(true) {
            self.connected = true;
            Ok(())
        } else {
            bail!("connection refused")
        }
    }

    fn read(&mut self) -> Result<ReadOutcome> {
        if !self.connected {
            bail!("not connected");
        }
        match self.steps.pop_front() {
            Some(Step::Frame { present }) => Ok(ReadOutcome::Frame(raw_frame(present))),
            Some(Step::ReadFailure) => {
                self.connected = false;
                Err(anyhow!("stream dropped"))
            }
            Some(Step::End) => Ok(ReadOutcome::EndOfStream),
            None => match &self.on_exhausted {
                Some(cancel) => {
                    cancel.cancel();
                    Ok(ReadOutcome::Frame(raw_frame(false)))
                }
                None => Ok(ReadOutcome::EndOfStream),
            },
        }
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

/// Stub detector that fails on chosen frame indices.
struct FlakyDetector {
    inner: StubBackend,
    fail_on: Vec<u64>,
}

impl DetectorBackend for FlakyDetector {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        if self.fail_on.contains(&frame.index) {
            bail!("inference crashed");
        }
        self.inner.detect(frame)
    }
}

/// Annotator whose first `failures` calls fail.
struct BrokenAnnotator {
    failures: Mutex<usize>,
}

impl FrameAnnotator for BrokenAnnotator {
    fn annotate(&self, frame: &Frame, _context: &AlertContext<'_>) -> Result<RgbImage> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            bail!("overlay renderer unavailable");
        }
        frame.to_rgb_image()
    }
}

fn frames(range: std::ops::RangeInclusive<u64>, present: impl Fn(u64) -> bool) -> Vec<Step> {
    range.map(|i| Step::Frame { present: present(i) }).collect()
}

fn settings(interval: Duration) -> PipelineSettings {
    PipelineSettings {
        interval,
        reconnect: ReconnectPolicy::fixed(Duration::ZERO),
        ..PipelineSettings::default()
    }
}

fn recorder(root: &Path) -> AlertRecorder {
    AlertRecorder::new(RecorderConfig {
        root: root.to_path_buf(),
        source_label: "test".to_string(),
        stamp_filenames: false,
    })
}

fn run_with(driver: PipelineDriver) -> (RunSummary, Vec<AlertRecord>) {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let summary = driver
        .on_alert(move |record| sink.lock().unwrap().push(record.clone()))
        .run();
    let records = records.lock().unwrap().clone();
    (summary, records)
}

fn run(
    source: ScriptedSource,
    settings: PipelineSettings,
    root: &Path,
    cancel: CancellationToken,
) -> (RunSummary, Vec<AlertRecord>) {
    run_with(PipelineDriver::new(
        Box::new(source),
        Box::new(StubBackend::new()),
        recorder(root),
        settings,
        cancel,
    ))
}

fn fired(records: &[AlertRecord]) -> Vec<(u64, u64)> {
    records.iter().map(|r| (r.id, r.frame_index)).collect()
}

#[test]
fn file_scenario_fires_on_frames_5_15_25() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(SourceKind::File, frames(1..=30, |i| i >= 5))
        .with_frame_rate(10.0);

    let (summary, records) = run(
        source,
        settings(Duration::from_secs(1)),
        dir.path(),
        CancellationToken::new(),
    );

    assert_eq!(fired(&records), vec![(1, 5), (2, 15), (3, 25)]);
    assert_eq!(summary.alerts_fired, 3);
    assert_eq!(summary.frames_read, 30);
    assert!(matches!(summary.termination, Termination::EndOfStream));
    assert!(summary.to_string().starts_with("watch finished: 3 alerts saved"));
    for id in 1..=3 {
        assert!(dir.path().join(format!("test/human_{}.jpg", id)).exists());
    }
}

#[test]
fn synthetic_clip_runs_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let descriptor =
        SourceDescriptor::classify("stub://clip?frames=30&fps=10&present=5-30&width=4&height=4")?;
    assert_eq!(descriptor.kind, SourceKind::File);
    let source = ingest::open_source(&descriptor, &SourceSettings::default())?;

    let (summary, records) = run_with(PipelineDriver::new(
        source,
        Box::new(StubBackend::new()),
        AlertRecorder::new(RecorderConfig {
            root: dir.path().to_path_buf(),
            source_label: descriptor.kind.label().to_string(),
            stamp_filenames: false,
        }),
        settings(Duration::from_secs(1)),
        CancellationToken::new(),
    ));

    assert_eq!(fired(&records), vec![(1, 5), (2, 15), (3, 25)]);
    assert_eq!(summary.alerts_fired, 3);
    assert!(dir.path().join("file/human_3.jpg").exists());
    let artifact = image::open(dir.path().join("file/human_1.jpg"))?;
    assert_eq!((artifact.width(), artifact.height()), (4, 4));
    Ok(())
}

#[test]
fn file_without_detections_finishes_after_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(SourceKind::File, frames(1..=12, |_| false))
        .with_frame_rate(10.0);
    let opens = Arc::clone(&source.open_calls);

    let (summary, records) = run(
        source,
        settings(Duration::from_secs(1)),
        dir.path(),
        CancellationToken::new(),
    );

    assert!(records.is_empty());
    assert_eq!(summary.alerts_fired, 0);
    assert_eq!(summary.frames_read, 12);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert!(matches!(summary.termination, Termination::EndOfStream));
    assert!(summary.to_string().starts_with("watch finished: 0 alerts saved"));
}

#[test]
fn first_presence_fires_regardless_of_interval() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(SourceKind::File, frames(1..=50, |i| i == 40))
        .with_frame_rate(30.0);

    let (_, records) = run(
        source,
        settings(Duration::from_secs(3_600)),
        dir.path(),
        CancellationToken::new(),
    );
    assert_eq!(fired(&records), vec![(1, 40)]);

    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let source = ScriptedSource::new(SourceKind::Device, frames(1..=3, |_| true)).cancelling(&cancel);
    let (_, records) = run(source, settings(Duration::from_secs(3_600)), dir.path(), cancel);
    assert_eq!(fired(&records), vec![(1, 1)]);
}

#[test]
fn configured_frame_rate_overrides_source() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(SourceKind::File, frames(1..=30, |_| true))
        .with_frame_rate(10.0);
    let settings = PipelineSettings {
        frame_rate: Some(5.0),
        ..settings(Duration::from_secs(1))
    };

    let (_, records) = run(source, settings, dir.path(), CancellationToken::new());
    let indices: Vec<u64> = records.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, vec![1, 6, 11, 16, 21, 26]);
}

#[test]
fn live_source_survives_repeated_failures() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let mut steps = frames(1..=2, |_| true);
    steps.push(Step::ReadFailure);
    steps.extend(frames(1..=3, |_| true));
    let source = ScriptedSource::new(SourceKind::Network, steps)
        .with_opens([false, false, false, true, false, false])
        .cancelling(&cancel);
    let opens = Arc::clone(&source.open_calls);

    let (summary, records) = run(source, settings(Duration::ZERO), dir.path(), cancel);

    assert!(matches!(summary.termination, Termination::Cancelled));
    assert_eq!(summary.reconnects, 6);
    assert_eq!(opens.load(Ordering::SeqCst), 7);
    assert_eq!(summary.frames_read, 6);

    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    let indices: Vec<u64> = records.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
}

#[test]
fn live_source_gives_up_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(SourceKind::Network, frames(1..=3, |_| true))
        .with_opens(vec![false; 10]);
    let settings = PipelineSettings {
        reconnect: ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::fixed(Duration::ZERO)
        },
        ..settings(Duration::from_secs(1))
    };

    let (summary, records) = run(source, settings, dir.path(), CancellationToken::new());

    assert!(records.is_empty());
    assert_eq!(summary.reconnects, 3);
    assert!(!summary.is_success());
    assert!(matches!(
        summary.termination,
        Termination::Fatal(PipelineError::ReconnectExhausted { attempts: 4, .. })
    ));
}

#[test]
fn file_failures_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(SourceKind::File, frames(1..=3, |_| true)).with_opens([false]);
    let (summary, _) = run(
        source,
        settings(Duration::from_secs(1)),
        dir.path(),
        CancellationToken::new(),
    );
    assert_eq!(summary.frames_read, 0);
    assert_eq!(summary.reconnects, 0);
    assert!(matches!(
        summary.termination,
        Termination::Fatal(PipelineError::SourceOpen { .. })
    ));

    let mut steps = frames(1..=3, |_| false);
    steps.push(Step::ReadFailure);
    steps.extend(frames(4..=6, |_| false));
    let source = ScriptedSource::new(SourceKind::File, steps);
    let (summary, _) = run(
        source,
        settings(Duration::from_secs(1)),
        dir.path(),
        CancellationToken::new(),
    );
    assert_eq!(summary.frames_read, 3);
    assert!(matches!(
        summary.termination,
        Termination::Fatal(PipelineError::FrameRead { .. })
    ));
}

#[test]
fn live_end_of_stream_reconnects() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let mut steps = frames(1..=2, |_| false);
    steps.push(Step::End);
    steps.extend(frames(3..=4, |_| false));
    let source = ScriptedSource::new(SourceKind::Device, steps).cancelling(&cancel);

    let (summary, _) = run(source, settings(Duration::from_secs(1)), dir.path(), cancel);

    assert_eq!(summary.reconnects, 1);
    assert_eq!(summary.frames_read, 5);
    assert!(matches!(summary.termination, Termination::Cancelled));
}

#[test]
fn cancellation_before_start_never_opens() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let source = ScriptedSource::new(SourceKind::Network, frames(1..=3, |_| true));
    let opens = Arc::clone(&source.open_calls);

    let (summary, records) = run(source, settings(Duration::from_secs(1)), dir.path(), cancel);

    assert!(records.is_empty());
    assert_eq!(opens.load(Ordering::SeqCst), 0);
    assert!(summary.is_success());
    assert!(matches!(summary.termination, Termination::Cancelled));
}

#[test]
fn cancellation_interrupts_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let source =
        ScriptedSource::new(SourceKind::Network, Vec::new()).with_opens(vec![false; 1_000]);
    let settings = PipelineSettings {
        reconnect: ReconnectPolicy::fixed(Duration::from_secs(3_600)),
        ..settings(Duration::from_secs(1))
    };

    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        trigger.cancel();
    });
    let (summary, _) = run(source, settings, dir.path(), cancel);
    canceller.join().unwrap();

    assert_eq!(summary.reconnects, 1);
    assert!(matches!(summary.termination, Termination::Cancelled));
}

#[test]
fn detector_failures_are_counted_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(SourceKind::File, frames(1..=10, |i| i >= 5))
        .with_frame_rate(10.0);
    let driver = PipelineDriver::new(
        Box::new(source),
        Box::new(FlakyDetector {
            inner: StubBackend::new(),
            fail_on: vec![5, 6],
        }),
        recorder(dir.path()),
        settings(Duration::from_millis(500)),
        CancellationToken::new(),
    );

    let (summary, records) = run_with(driver);

    assert_eq!(fired(&records), vec![(1, 7)]);
    assert_eq!(summary.detector_failures, 2);
    assert!(matches!(summary.termination, Termination::EndOfStream));
}

#[test]
fn persistence_failures_keep_ids_dense() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScriptedSource::new(SourceKind::File, frames(1..=30, |_| true))
        .with_frame_rate(10.0);
    let driver = PipelineDriver::new(
        Box::new(source),
        Box::new(StubBackend::new()),
        recorder(dir.path()),
        settings(Duration::from_secs(1)),
        CancellationToken::new(),
    )
    .with_annotator(Box::new(BrokenAnnotator {
        failures: Mutex::new(1),
    }));

    let (summary, records) = run_with(driver);

    // The failed attempt at frame 1 still used up its window.
    assert_eq!(fired(&records), vec![(1, 11), (2, 21)]);
    assert_eq!(summary.persistence_failures, 1);
    assert_eq!(summary.alerts_fired, 2);
    assert!(summary.is_success());
}
