//! The watch loop.
//!
//! `PipelineDriver` owns one source session, one throttle and one id counter, and runs the
//! per-frame chain strictly in order:
//!
//! ```text
//! read -> detect -> evaluate -> throttle -> annotate -> record
//! ```
//!
//! State machine:
//!
//! ```text
//! NoSource -> Connecting -> Streaming -> Connecting (live source failure)
//!                                     -> Terminated (end of stream, cancellation, fatal)
//! ```
//!
//! Failures of live sources are absorbed and retried according to `ReconnectPolicy`. Finite
//! sources fail fatally. Detector and persistence failures never stop the loop; they are
//! counted in the `RunSummary`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alert::{AlertRecord, AlertRecorder};
use crate::detect::DetectorBackend;
use crate::error::PipelineError;
use crate::evaluate::PresencePolicy;
use crate::frame::Frame;
use crate::ingest::{Source, SourceConnector, StreamEvent};
use crate::overlay::{AlertContext, FrameAnnotator, PlainAnnotator};
use crate::throttle::{AlertThrottle, ThrottleMode};

/// Longest uninterrupted sleep while backing off, so cancellation stays responsive.
const BACKOFF_SLICE: Duration = Duration::from_millis(100);

pub const DEFAULT_HEADLINE: &str = "Human Detected";

/// Cooperative cancellation flag, polled once per loop iteration.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How live sources are reconnected.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub delay: Duration,
    /// Growth factor per consecutive failure. 1.0 keeps the delay fixed.
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            multiplier: 1.0,
            max_delay: Duration::from_secs(300),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, unlimited retries.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Backoff after the `attempt`-th consecutive failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay.max(self.delay);
        }
        Duration::from_secs_f64(secs)
    }

    /// Whether a retry is allowed after the `attempt`-th consecutive failure.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PipelineState {
    NoSource,
    Connecting,
    Streaming,
    Terminated,
}

/// Why a run ended.
#[derive(Debug)]
pub enum Termination {
    /// A finite source was read to the end.
    EndOfStream,
    Cancelled,
    Fatal(PipelineError),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::EndOfStream => f.write_str("end of stream"),
            Termination::Cancelled => f.write_str("cancelled"),
            Termination::Fatal(err) => write!(f, "fatal: {}", err),
        }
    }
}

/// Termination report of one run.
#[derive(Debug)]
pub struct RunSummary {
    pub alerts_fired: u64,
    pub frames_read: u64,
    pub reconnects: u64,
    pub detector_failures: u64,
    pub persistence_failures: u64,
    pub termination: Termination,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        !matches!(self.termination, Termination::Fatal(_))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "watch finished: {} alerts saved ({} frames, {} reconnects, {} detector failures, \
             {} persistence failures; {})",
            self.alerts_fired,
            self.frames_read,
            self.reconnects,
            self.detector_failures,
            self.persistence_failures,
            self.termination
        )
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub policy: PresencePolicy,
    /// Minimum spacing between alerts.
    pub interval: Duration,
    /// Overrides the source's own frame rate for the frame-based throttle.
    pub frame_rate: Option<f64>,
    pub reconnect: ReconnectPolicy,
    /// Headline handed to the annotator.
    pub headline: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            policy: PresencePolicy::default(),
            interval: Duration::from_secs(5),
            frame_rate: None,
            reconnect: ReconnectPolicy::default(),
            headline: DEFAULT_HEADLINE.to_string(),
        }
    }
}

type AlertHook = Box<dyn FnMut(&AlertRecord) + Send>;

#[derive(Default)]
struct Counters {
    frames_read: u64,
    reconnects: u64,
    detector_failures: u64,
    persistence_failures: u64,
    /// Failures since the last frame was read.
    consecutive_failures: u32,
}

pub struct PipelineDriver {
    connector: SourceConnector,
    detector: Box<dyn DetectorBackend>,
    annotator: Box<dyn FrameAnnotator>,
    recorder: AlertRecorder,
    settings: PipelineSettings,
    cancel: CancellationToken,
    throttle: Option<AlertThrottle>,
    on_alert: Option<AlertHook>,
    state: PipelineState,
    counters: Counters,
}

impl PipelineDriver {
    pub fn new(
        source: Box<dyn Source>,
        detector: Box<dyn DetectorBackend>,
        recorder: AlertRecorder,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector: SourceConnector::new(source),
            detector,
            annotator: Box::new(PlainAnnotator),
            recorder,
            settings,
            cancel,
            throttle: None,
            on_alert: None,
            state: PipelineState::NoSource,
            counters: Counters::default(),
        }
    }

    pub fn with_annotator(mut self, annotator: Box<dyn FrameAnnotator>) -> Self {
        self.annotator = annotator;
        self
    }

    /// Called after every persisted alert.
    pub fn on_alert(mut self, hook: impl FnMut(&AlertRecord) + Send + 'static) -> Self {
        self.on_alert = Some(Box::new(hook));
        self
    }

    /// Run until end of stream, cancellation or a fatal failure.
    pub fn run(mut self) -> RunSummary {
        let termination = self.drive();
        self.connector.close();
        self.transition(PipelineState::Terminated);

        let summary = RunSummary {
            alerts_fired: self.recorder.persisted(),
            frames_read: self.counters.frames_read,
            reconnects: self.counters.reconnects,
            detector_failures: self.counters.detector_failures,
            persistence_failures: self.counters.persistence_failures,
            termination,
        };
        log::info!("{}", summary);
        summary
    }

    fn drive(&mut self) -> Termination {
        if let Err(err) = self.detector.warm_up() {
            return Termination::Fatal(PipelineError::detector(self.detector.name(), 0, err));
        }
        log::info!(
            "watching {} ({}, {} detector, target class {} at >= {:.2})",
            self.connector.location(),
            self.connector.kind(),
            self.detector.name(),
            self.settings.policy.target_class,
            self.settings.policy.min_confidence
        );

        loop {
            if self.cancel.is_cancelled() {
                log::info!("cancellation requested");
                return Termination::Cancelled;
            }
            match self.state {
                PipelineState::NoSource => self.transition(PipelineState::Connecting),
                PipelineState::Connecting => match self.connector.open() {
                    Ok(()) => {
                        log::info!(
                            "connected to {} (session {})",
                            self.connector.location(),
                            self.connector.sessions()
                        );
                        self.ensure_throttle();
                        self.transition(PipelineState::Streaming);
                    }
                    Err(err) => {
                        if let Some(termination) = self.source_failed(err) {
                            return termination;
                        }
                    }
                },
                PipelineState::Streaming => match self.connector.read() {
                    Ok(StreamEvent::Frame(frame)) => {
                        self.counters.frames_read += 1;
                        self.counters.consecutive_failures = 0;
                        self.process(&frame);
                    }
                    Ok(StreamEvent::EndOfStream) => {
                        log::info!(
                            "{} ended after {} frames",
                            self.connector.location(),
                            self.counters.frames_read
                        );
                        return Termination::EndOfStream;
                    }
                    Err(err) => {
                        self.connector.close();
                        if let Some(termination) = self.source_failed(err) {
                            return termination;
                        }
                        self.transition(PipelineState::Connecting);
                    }
                },
                PipelineState::Terminated => {
                    unreachable!("the pipeline only terminates after the driver loop returns")
                }
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            log::debug!(
                "pipeline {:?} -> {:?} (session {:?})",
                self.state,
                next,
                self.connector.state()
            );
            self.state = next;
        }
    }

    /// The throttle mode depends on the frame rate, which some sources only know once open.
    fn ensure_throttle(&mut self) {
        if self.throttle.is_some() {
            return;
        }
        let frame_rate = self.settings.frame_rate.or(self.connector.frame_rate());
        let throttle = AlertThrottle::new(ThrottleMode::for_source(
            self.connector.kind(),
            frame_rate,
            self.settings.interval,
        ));
        log::info!("alert throttle: {:?}", throttle.mode());
        self.throttle = Some(throttle);
    }

    /// Handle an open or read failure. Returns the termination when the run must end.
    ///
    /// Only source failures of unbounded sources are retried; everything else is fatal.
    fn source_failed(&mut self, err: PipelineError) -> Option<Termination> {
        if !self.connector.is_unbounded() || !err.is_source_failure() {
            log::error!("{}", err);
            return Some(Termination::Fatal(err));
        }

        self.counters.consecutive_failures = self.counters.consecutive_failures.saturating_add(1);
        let attempt = self.counters.consecutive_failures;
        let policy = self.settings.reconnect;
        if !policy.allows(attempt) {
            log::error!("{}", err);
            return Some(Termination::Fatal(PipelineError::ReconnectExhausted {
                location: self.connector.location().to_string(),
                attempts: attempt,
            }));
        }

        let delay = policy.delay_for(attempt);
        log::warn!("{}; reconnecting in {:.1}s (attempt {})", err, delay.as_secs_f64(), attempt);
        self.counters.reconnects += 1;
        if !self.backoff(delay) {
            log::info!("cancellation requested during reconnect backoff");
            return Some(Termination::Cancelled);
        }
        None
    }

    /// Sleep for `delay` unless cancelled first. Returns false when cancelled.
    fn backoff(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(BACKOFF_SLICE));
        }
    }

    fn process(&mut self, frame: &Frame) {
        let result = match self.detector.detect(frame) {
            Ok(result) => Some(result),
            Err(err) => {
                self.counters.detector_failures += 1;
                log::warn!(
                    "{}; treating frame as empty",
                    PipelineError::detector(self.detector.name(), frame.index, err)
                );
                None
            }
        };

        let evaluation = self.settings.policy.evaluate(result.as_ref());
        if !evaluation.present {
            log::debug!("frame {}: no target detected at {}", frame.index, frame.timestamp());
            return;
        }

        let Some(throttle) = self.throttle.as_mut() else {
            return;
        };
        let marker = throttle.marker_for(frame);
        if !throttle.should_fire(marker) {
            log::debug!("frame {}: target present, within alert interval", frame.index);
            return;
        }
        // Reset before persisting: one decision per window even if the write fails.
        throttle.reset(marker);

        let timestamp = frame.timestamp();
        let context = AlertContext {
            present: true,
            headline: &self.settings.headline,
            timestamp: &timestamp,
        };
        let annotated = match self.annotator.annotate(frame, &context) {
            Ok(image) => image,
            Err(err) => {
                self.counters.persistence_failures += 1;
                log::error!("{}", PipelineError::persistence(self.recorder.dir(), err));
                return;
            }
        };

        match self.recorder.record(frame, &annotated, evaluation.matches.len()) {
            Ok(record) => {
                log::info!(
                    "alert #{}: {} at {} (frame {}), saved {}",
                    record.id,
                    self.settings.headline,
                    timestamp,
                    record.frame_index,
                    record.path.display()
                );
                if let Some(hook) = self.on_alert.as_mut() {
                    hook(&record);
                }
            }
            Err(err) => {
                self.counters.persistence_failures += 1;
                log::error!("{}", err);
            }
        }
    }
}
