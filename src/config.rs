use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::alert::{RecorderConfig, DEFAULT_ALERTS_ROOT};
use crate::detect::{
    DetectorBackend, StubBackend, DEFAULT_IOU_THRESHOLD, DEFAULT_SCORE_FLOOR, PERSON_CLASS_ID,
    STUB_CONFIDENCE,
};
use crate::error::PipelineError;
use crate::evaluate::PresencePolicy;
use crate::ingest::{SourceDescriptor, SourceKind, SourceSettings};
use crate::pipeline::{PipelineSettings, ReconnectPolicy, DEFAULT_HEADLINE};

const DEFAULT_MIN_CONFIDENCE: f32 = 0.45;
const DEFAULT_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_RECONNECT_DELAY_SECS: f64 = 5.0;
const DEFAULT_RECONNECT_MAX_DELAY_SECS: f64 = 300.0;
const DEFAULT_CAPTURE_WIDTH: u32 = 1280;
const DEFAULT_CAPTURE_HEIGHT: u32 = 720;
const DEFAULT_MODEL_INPUT: u32 = 640;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WatchConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerts: Option<AlertsConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
    frame_rate: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    descriptor: Option<String>,
    kind: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    target_class: Option<u32>,
    min_confidence: Option<f32>,
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    score_floor: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertsConfigFile {
    dir: Option<PathBuf>,
    interval_secs: Option<f64>,
    source_label: Option<String>,
    stamp_filenames: Option<bool>,
    headline: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ReconnectConfigFile {
    delay_secs: Option<f64>,
    multiplier: Option<f64>,
    max_delay_secs: Option<f64>,
    max_attempts: Option<u32>,
}

/// Which detector backend runs the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    Stub,
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(DetectorKind::Stub),
            "tract" | "onnx" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected stub or tract",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub source: SourceConfig,
    pub detection: DetectionSettings,
    pub alerts: AlertSettings,
    pub reconnect: ReconnectPolicy,
    /// Frame rate override for the frame-based throttle.
    pub frame_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// File path, network URL or device index. Required before a run.
    pub descriptor: Option<String>,
    /// Forced kind; classified from the descriptor when absent.
    pub kind: Option<SourceKind>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub target_class: u32,
    pub min_confidence: f32,
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Raw head score below which model anchors are dropped.
    pub score_floor: f32,
    /// Same-class overlap above which model detections are merged.
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub dir: PathBuf,
    pub interval: Duration,
    /// Artifact subdirectory; defaults to the source kind.
    pub source_label: Option<String>,
    /// Timestamped artifact names; defaults to on for cameras only.
    pub stamp_filenames: Option<bool>,
    pub headline: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::from_file(WatchConfigFile::default())
    }
}

impl WatchConfig {
    /// Load the JSON file named by `WATCH_CONFIG` (if any), apply `WATCH_*` overrides and
    /// validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => WatchConfigFile::default(),
        };
        let mut source_kind = None;
        if let Some(kind) = file_cfg.source.as_ref().and_then(|s| s.kind.as_deref()) {
            source_kind = Some(kind.parse::<SourceKind>()?);
        }
        let backend = match file_cfg.detection.as_ref().and_then(|d| d.backend.as_deref()) {
            Some(backend) => backend.parse::<DetectorKind>()?,
            None => DetectorKind::Stub,
        };
        let durations = FileDurations::from_file(&file_cfg)?;

        let mut cfg = Self::from_file(file_cfg);
        cfg.source.kind = source_kind;
        cfg.detection.backend = backend;
        cfg.alerts.interval = durations.interval;
        cfg.reconnect.delay = durations.reconnect_delay;
        cfg.reconnect.max_delay = durations.reconnect_max_delay;

        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let reconnect = file.reconnect.unwrap_or_default();

        Self {
            source: SourceConfig {
                descriptor: source.descriptor,
                kind: None,
                width: source.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
                target_fps: source.target_fps.unwrap_or(0),
            },
            detection: DetectionSettings {
                target_class: detection.target_class.unwrap_or(PERSON_CLASS_ID),
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                backend: DetectorKind::Stub,
                model_path: detection.model_path,
                input_size: detection.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
                score_floor: detection.score_floor.unwrap_or(DEFAULT_SCORE_FLOOR),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            alerts: AlertSettings {
                dir: alerts
                    .dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ALERTS_ROOT)),
                interval: Duration::from_secs_f64(DEFAULT_INTERVAL_SECS),
                source_label: alerts.source_label,
                stamp_filenames: alerts.stamp_filenames,
                headline: alerts
                    .headline
                    .unwrap_or_else(|| DEFAULT_HEADLINE.to_string()),
            },
            reconnect: ReconnectPolicy {
                delay: Duration::from_secs_f64(DEFAULT_RECONNECT_DELAY_SECS),
                multiplier: reconnect.multiplier.unwrap_or(1.0),
                max_delay: Duration::from_secs_f64(DEFAULT_RECONNECT_MAX_DELAY_SECS),
                max_attempts: reconnect.max_attempts,
            },
            frame_rate: file.frame_rate,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("WATCH_SOURCE") {
            self.source.descriptor = Some(source);
        }
        if let Some(kind) = env_value("WATCH_SOURCE_KIND") {
            self.source.kind = Some(kind.parse().context("WATCH_SOURCE_KIND")?);
        }
        if let Some(class) = env_value("WATCH_TARGET_CLASS") {
            self.detection.target_class = class
                .parse()
                .map_err(|_| anyhow!("WATCH_TARGET_CLASS must be a non-negative integer"))?;
        }
        if let Some(confidence) = env_value("WATCH_MIN_CONFIDENCE") {
            self.detection.min_confidence = confidence
                .parse()
                .map_err(|_| anyhow!("WATCH_MIN_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Some(interval) = env_value("WATCH_INTERVAL_SECS") {
            self.alerts.interval = parse_secs("WATCH_INTERVAL_SECS", &interval)?;
        }
        if let Some(delay) = env_value("WATCH_RECONNECT_DELAY_SECS") {
            self.reconnect.delay = parse_secs("WATCH_RECONNECT_DELAY_SECS", &delay)?;
        }
        if let Some(attempts) = env_value("WATCH_RECONNECT_MAX_ATTEMPTS") {
            self.reconnect.max_attempts = Some(attempts.parse().map_err(|_| {
                anyhow!("WATCH_RECONNECT_MAX_ATTEMPTS must be a non-negative integer")
            })?);
        }
        if let Some(rate) = env_value("WATCH_FRAME_RATE") {
            self.frame_rate = Some(
                rate.parse()
                    .map_err(|_| anyhow!("WATCH_FRAME_RATE must be a number of frames per second"))?,
            );
        }
        if let Some(dir) = env_value("WATCH_ALERTS_DIR") {
            self.alerts.dir = PathBuf::from(dir);
        }
        if let Some(label) = env_value("WATCH_SOURCE_LABEL") {
            self.alerts.source_label = Some(label);
        }
        if let Some(stamp) = env_value("WATCH_STAMP_FILENAMES") {
            self.alerts.stamp_filenames = Some(parse_bool("WATCH_STAMP_FILENAMES", &stamp)?);
        }
        Ok(())
    }

    /// Check value ranges. Called by `load`; callers that override fields afterwards (the CLI)
    /// call it again.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let confidence = self.detection.min_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(PipelineError::config(format!(
                "min confidence must be within [0, 1], got {}",
                confidence
            )));
        }
        if let Some(rate) = self.frame_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(PipelineError::config(format!(
                    "frame rate must be positive, got {}",
                    rate
                )));
            }
        }
        if !self.reconnect.multiplier.is_finite() || self.reconnect.multiplier < 1.0 {
            return Err(PipelineError::config(
                "reconnect multiplier must be at least 1.0",
            ));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(PipelineError::config("capture size must be non-zero"));
        }
        for (name, value) in [
            ("score floor", self.detection.score_floor),
            ("IoU threshold", self.detection.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.detection.input_size == 0 {
            return Err(PipelineError::config("model input size must be non-zero"));
        }
        if self.detection.backend == DetectorKind::Tract && self.detection.model_path.is_none() {
            return Err(PipelineError::config(
                "the tract backend requires a model path",
            ));
        }
        if let Some(label) = &self.alerts.source_label {
            let trimmed = label.trim();
            if trimmed.is_empty()
                || trimmed == "."
                || trimmed == ".."
                || trimmed.contains(['/', '\\'])
            {
                return Err(PipelineError::config(format!(
                    "source label '{}' must be a single directory name",
                    label
                )));
            }
        }
        if let Some(descriptor) = &self.source.descriptor {
            if descriptor.trim().is_empty() {
                return Err(PipelineError::config("source descriptor is empty"));
            }
        }
        Ok(())
    }

    /// Classified source descriptor, honoring a forced kind.
    pub fn descriptor(&self) -> Result<SourceDescriptor> {
        let raw = self
            .source
            .descriptor
            .as_deref()
            .ok_or_else(|| anyhow!("no source configured; pass a source or set WATCH_SOURCE"))?;
        match self.source.kind {
            Some(kind) => SourceDescriptor::with_kind(kind, raw),
            None => SourceDescriptor::classify(raw),
        }
    }

    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            width: self.source.width,
            height: self.source.height,
            target_fps: self.source.target_fps,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            policy: PresencePolicy {
                target_class: self.detection.target_class,
                min_confidence: self.detection.min_confidence,
            },
            interval: self.alerts.interval,
            frame_rate: self.frame_rate,
            reconnect: self.reconnect,
            headline: self.alerts.headline.clone(),
        }
    }

    pub fn recorder_config(&self, kind: SourceKind) -> RecorderConfig {
        RecorderConfig {
            root: self.alerts.dir.clone(),
            source_label: self
                .alerts
                .source_label
                .clone()
                .unwrap_or_else(|| kind.label().to_string()),
            stamp_filenames: self
                .alerts
                .stamp_filenames
                .unwrap_or(kind == SourceKind::Device),
        }
    }
}

impl DetectionSettings {
    /// Instantiate the configured detector backend.
    pub fn build_backend(&self) -> Result<Box<dyn DetectorBackend>> {
        match self.backend {
            DetectorKind::Stub => Ok(Box::new(StubBackend::reporting(
                self.target_class,
                STUB_CONFIDENCE,
            ))),
            #[cfg(feature = "backend-tract")]
            DetectorKind::Tract => {
                let model_path = self
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("the tract backend requires a model path"))?;
                let backend =
                    crate::detect::TractBackend::new(model_path, self.input_size, self.input_size)?
                        .with_score_floor(self.score_floor)
                        .with_iou_threshold(self.iou_threshold);
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "backend-tract"))]
            DetectorKind::Tract => Err(anyhow!(
                "the tract backend requires the backend-tract feature"
            )),
        }
    }
}

struct FileDurations {
    interval: Duration,
    reconnect_delay: Duration,
    reconnect_max_delay: Duration,
}

impl FileDurations {
    fn from_file(file: &WatchConfigFile) -> Result<Self> {
        let alerts = file.alerts.as_ref();
        let reconnect = file.reconnect.as_ref();
        Ok(Self {
            interval: secs_or(
                "alerts.interval_secs",
                alerts.and_then(|a| a.interval_secs),
                DEFAULT_INTERVAL_SECS,
            )?,
            reconnect_delay: secs_or(
                "reconnect.delay_secs",
                reconnect.and_then(|r| r.delay_secs),
                DEFAULT_RECONNECT_DELAY_SECS,
            )?,
            reconnect_max_delay: secs_or(
                "reconnect.max_delay_secs",
                reconnect.and_then(|r| r.max_delay_secs),
                DEFAULT_RECONNECT_MAX_DELAY_SECS,
            )?,
        })
    }
}

fn secs_or(name: &str, value: Option<f64>, default: f64) -> Result<Duration> {
    let secs = value.unwrap_or(default);
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds, got {}", name, secs))
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    let secs: f64 = value
        .parse()
        .map_err(|_| anyhow!("{} must be a number of seconds", name))?;
    secs_or(name, Some(secs), 0.0)
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be true or false", name)),
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
