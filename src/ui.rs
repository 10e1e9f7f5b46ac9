use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::alert::AlertRecord;
use crate::pipeline::RunSummary;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    /// A startup step, finished when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = spinner();
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Live status line for a running watch.
    pub fn watch(&self, location: &str) -> WatchProgress {
        let spinner = self.use_pretty().then(|| {
            let spinner = spinner();
            spinner.set_message(format!("watching {location}: no alerts yet"));
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> watching {}", location);
        }
        WatchProgress {
            location: location.to_string(),
            spinner,
        }
    }
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Spinner updated from the pipeline's alert hook. Cheap to clone; clones share the line.
#[derive(Clone)]
pub struct WatchProgress {
    location: String,
    spinner: Option<ProgressBar>,
}

impl WatchProgress {
    pub fn alert(&self, record: &AlertRecord) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "watching {}: {} alerts, last at frame {}",
                self.location, record.id, record.frame_index
            ));
        }
    }

    pub fn finish(&self, summary: &RunSummary) {
        match &self.spinner {
            Some(spinner) if summary.is_success() => {
                spinner.finish_with_message(format!("✔ {}", summary))
            }
            Some(spinner) => spinner.abandon_with_message(format!("✘ {}", summary)),
            None => eprintln!("{}", summary),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_never_draws_spinners() {
        let ui = Ui::from_args(Some("plain"), true, false);
        assert!(!ui.use_pretty());
        assert!(ui.watch("stub://clip").spinner.is_none());
    }

    #[test]
    fn auto_mode_needs_a_tty() {
        assert!(!Ui::from_args(None, false, false).use_pretty());
        assert!(!Ui::from_args(None, true, true).use_pretty());
        assert!(Ui::from_args(Some("pretty"), true, true).use_pretty());
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
