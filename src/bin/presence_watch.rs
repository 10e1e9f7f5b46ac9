//! presence_watch - watch a file, stream or camera and save snapshot alerts
//!
//! This binary:
//! 1. Loads `WatchConfig` (JSON file, `WATCH_*` environment, then flags)
//! 2. Opens the source and the detector backend
//! 3. Runs the watch loop until the file ends, the operator quits (Ctrl-C or `q`), or a
//!    fatal error occurs
//! 4. Prints the alert total and exits non-zero on fatal termination

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use presence_watch::config::DetectorKind;
use presence_watch::ingest::{self, SourceKind};
use presence_watch::ui::Ui;
use presence_watch::{
    AlertRecorder, BannerAnnotator, CancellationToken, PipelineDriver, Termination,
    WatchConfig,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch a video file, network stream or camera and save snapshot alerts when the target class appears"
)]
struct Args {
    /// File path, rtsp:// or http:// URL, camera index or /dev/video* node.
    source: Option<String>,

    /// JSON config file.
    #[arg(long, env = "WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Force the source kind (file, network, device).
    #[arg(long)]
    kind: Option<SourceKind>,

    /// Class id counted as presence (0 = person).
    #[arg(long)]
    target_class: Option<u32>,

    /// Minimum detection confidence in [0, 1].
    #[arg(long)]
    min_confidence: Option<f32>,

    /// Minimum seconds between alerts.
    #[arg(long)]
    interval_secs: Option<f64>,

    /// Delay before reconnecting a live source.
    #[arg(long)]
    reconnect_delay_secs: Option<f64>,

    /// Give up after this many consecutive reconnect failures.
    #[arg(long)]
    reconnect_max_attempts: Option<u32>,

    /// Frame rate for the frame-based throttle on files.
    #[arg(long)]
    frame_rate: Option<f64>,

    /// Root directory for alert artifacts.
    #[arg(long)]
    alerts_dir: Option<PathBuf>,

    /// Artifact subdirectory (defaults to the source kind).
    #[arg(long)]
    source_label: Option<String>,

    /// Detector backend (stub, tract).
    #[arg(long)]
    backend: Option<DetectorKind>,

    /// ONNX model for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Save frames without the status banner.
    #[arg(long)]
    plain_frames: bool,

    /// Progress output (auto, plain, pretty).
    #[arg(long, env = "WATCH_UI")]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_args(
        args.ui.as_deref(),
        std::io::stderr().is_terminal(),
        std::env::var_os("CI").is_some(),
    );

    let cfg = {
        let _stage = ui.stage("Loading configuration");
        let mut cfg = WatchConfig::load_from(args.config.as_deref())?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };

    let descriptor = cfg.descriptor()?;
    let source = {
        let _stage = ui.stage("Preparing source");
        ingest::open_source(&descriptor, &cfg.source_settings())?
    };
    let detector = {
        let _stage = ui.stage("Loading detector");
        cfg.detection.build_backend()?
    };
    let recorder = AlertRecorder::new(cfg.recorder_config(descriptor.kind));
    log::info!(
        "alerts for {} ({}) go to {}",
        descriptor.location,
        descriptor.kind,
        recorder.dir().display()
    );

    let cancel = CancellationToken::new();
    install_cancellation(&cancel)?;

    let progress = ui.watch(&descriptor.location);
    let hook_progress = progress.clone();
    let mut driver = PipelineDriver::new(
        source,
        detector,
        recorder,
        cfg.pipeline_settings(),
        cancel,
    )
    .on_alert(move |record| hook_progress.alert(record));
    if !args.plain_frames {
        driver = driver.with_annotator(Box::new(BannerAnnotator::default()));
    }

    let summary = driver.run();
    progress.finish(&summary);
    println!("Total alerts saved: {}", summary.alerts_fired);

    match summary.termination {
        Termination::Fatal(err) => Err(err.into()),
        Termination::EndOfStream | Termination::Cancelled => Ok(()),
    }
}

fn apply_args(cfg: &mut WatchConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.source.descriptor = Some(source.clone());
    }
    if let Some(kind) = args.kind {
        cfg.source.kind = Some(kind);
    }
    if let Some(class) = args.target_class {
        cfg.detection.target_class = class;
    }
    if let Some(confidence) = args.min_confidence {
        cfg.detection.min_confidence = confidence;
    }
    if let Some(interval) = args.interval_secs {
        cfg.alerts.interval = seconds("--interval-secs", interval)?;
    }
    if let Some(delay) = args.reconnect_delay_secs {
        cfg.reconnect.delay = seconds("--reconnect-delay-secs", delay)?;
    }
    if let Some(attempts) = args.reconnect_max_attempts {
        cfg.reconnect.max_attempts = Some(attempts);
    }
    if let Some(rate) = args.frame_rate {
        cfg.frame_rate = Some(rate);
    }
    if let Some(dir) = &args.alerts_dir {
        cfg.alerts.dir = dir.clone();
    }
    if let Some(label) = &args.source_label {
        cfg.alerts.source_label = Some(label.clone());
    }
    if let Some(backend) = args.backend {
        cfg.detection.backend = backend;
    }
    if let Some(model) = &args.model {
        cfg.detection.model_path = Some(model.clone());
    }
    Ok(())
}

fn seconds(flag: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds", flag))
}

/// Ctrl-C always cancels; on an interactive terminal, so does a line reading `q`.
fn install_cancellation(cancel: &CancellationToken) -> Result<()> {
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping watch...");
        on_signal.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    if std::io::stdin().is_terminal() {
        let on_quit = cancel.clone();
        std::thread::Builder::new()
            .name("quit-listener".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if line.trim().eq_ignore_ascii_case("q") {
                        log::info!("quit requested, stopping watch...");
                        on_quit.cancel();
                        break;
                    }
                }
            })
            .context("spawn quit listener")?;
        log::info!("press q then Enter (or Ctrl-C) to stop");
    }
    Ok(())
}
