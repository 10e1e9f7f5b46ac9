//! Interval-based alert throttling.
//!
//! The throttle remembers when the last alert fired, as a wall-clock instant for live
//! sources or as a frame index for finite sources with a known frame rate, and decides
//! whether the current frame may fire another one.

use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::ingest::SourceKind;

/// Bookmark of the last fired alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleMarker {
    Time(Instant),
    Frame(u64),
}

/// How the minimum spacing between alerts is measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleMode {
    Time { interval: Duration },
    Frames { interval_frames: u64 },
}

impl ThrottleMode {
    /// Frame-based for finite sources with a known frame rate, time-based otherwise.
    pub fn for_source(kind: SourceKind, frame_rate: Option<f64>, interval: Duration) -> Self {
        match frame_rate {
            Some(fps) if !kind.is_unbounded() && fps.is_finite() && fps > 0.0 => Self::Frames {
                interval_frames: interval_frames(fps, interval),
            },
            _ => Self::Time { interval },
        }
    }
}

/// `round(fps × interval)`.
pub fn interval_frames(fps: f64, interval: Duration) -> u64 {
    (fps * interval.as_secs_f64()).round().max(0.0) as u64
}

/// Decides whether a present frame may fire a new alert.
#[derive(Clone, Debug)]
pub struct AlertThrottle {
    mode: ThrottleMode,
    /// `None` behaves as if an alert fired one full interval before the pipeline started.
    last_fired: Option<ThrottleMarker>,
}

impl AlertThrottle {
    pub fn new(mode: ThrottleMode) -> Self {
        Self {
            mode,
            last_fired: None,
        }
    }

    pub fn mode(&self) -> ThrottleMode {
        self.mode
    }

    /// Marker of `frame` in this throttle's flavor.
    pub fn marker_for(&self, frame: &Frame) -> ThrottleMarker {
        match self.mode {
            ThrottleMode::Time { .. } => ThrottleMarker::Time(frame.capture_instant()),
            ThrottleMode::Frames { .. } => ThrottleMarker::Frame(frame.index),
        }
    }

    pub fn should_fire(&self, current: ThrottleMarker) -> bool {
        let Some(last) = self.last_fired else {
            return true;
        };
        match (self.mode, last, current) {
            (ThrottleMode::Time { interval }, ThrottleMarker::Time(last), ThrottleMarker::Time(now)) => {
                now.saturating_duration_since(last) >= interval
            }
            (
                ThrottleMode::Frames { interval_frames },
                ThrottleMarker::Frame(last),
                ThrottleMarker::Frame(index),
            ) => index.saturating_sub(last) >= interval_frames,
            _ => {
                log::warn!(
                    "throttle marker {:?} does not match mode {:?}; not firing",
                    current,
                    self.mode
                );
                false
            }
        }
    }

    /// Record a fire at `current`. Called before the alert is persisted.
    pub fn reset(&mut self, current: ThrottleMarker) {
        self.last_fired = Some(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_interval_is_rounded() {
        assert_eq!(interval_frames(10.0, Duration::from_secs(1)), 10);
        assert_eq!(interval_frames(29.97, Duration::from_secs(5)), 150);
        assert_eq!(interval_frames(12.5, Duration::from_millis(500)), 6);
        assert_eq!(interval_frames(25.0, Duration::ZERO), 0);
    }

    #[test]
    fn mode_follows_source_kind() {
        let interval = Duration::from_secs(5);
        assert_eq!(
            ThrottleMode::for_source(SourceKind::File, Some(30.0), interval),
            ThrottleMode::Frames {
                interval_frames: 150
            }
        );
        assert_eq!(
            ThrottleMode::for_source(SourceKind::File, None, interval),
            ThrottleMode::Time { interval }
        );
        assert_eq!(
            ThrottleMode::for_source(SourceKind::Network, Some(30.0), interval),
            ThrottleMode::Time { interval }
        );
        assert_eq!(
            ThrottleMode::for_source(SourceKind::Device, Some(30.0), interval),
            ThrottleMode::Time { interval }
        );
    }

    #[test]
    fn first_presence_always_fires() {
        let throttle = AlertThrottle::new(ThrottleMode::Frames {
            interval_frames: 1_000,
        });
        assert!(throttle.should_fire(ThrottleMarker::Frame(1)));

        let throttle = AlertThrottle::new(ThrottleMode::Time {
            interval: Duration::from_secs(3_600),
        });
        assert!(throttle.should_fire(ThrottleMarker::Time(Instant::now())));
    }

    #[test]
    fn frame_throttle_enforces_spacing() {
        let mut throttle = AlertThrottle::new(ThrottleMode::Frames {
            interval_frames: 10,
        });
        let mut fired = Vec::new();
        for index in 5..=30 {
            let marker = ThrottleMarker::Frame(index);
            if throttle.should_fire(marker) {
                throttle.reset(marker);
                fired.push(index);
            }
        }
        assert_eq!(fired, vec![5, 15, 25]);
    }

    #[test]
    fn time_throttle_enforces_lower_bound() {
        let interval = Duration::from_secs(5);
        let mut throttle = AlertThrottle::new(ThrottleMode::Time { interval });
        let start = Instant::now();

        let mut fired = Vec::new();
        // One observation every 700 ms for a minute.
        for step in 0..86u64 {
            let now = start + Duration::from_millis(step * 700);
            let marker = ThrottleMarker::Time(now);
            if throttle.should_fire(marker) {
                throttle.reset(marker);
                fired.push(now);
            }
        }

        assert!(fired.len() > 1);
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }

    #[test]
    fn presence_gaps_do_not_queue_fires() {
        let mut throttle = AlertThrottle::new(ThrottleMode::Frames { interval_frames: 10 });
        throttle.reset(ThrottleMarker::Frame(1));

        // Frame 11 would qualify but is absent; the next present frame fires instead.
        assert!(!throttle.should_fire(ThrottleMarker::Frame(10)));
        assert!(throttle.should_fire(ThrottleMarker::Frame(14)));
    }

    #[test]
    fn mismatched_marker_does_not_fire() {
        let mut throttle = AlertThrottle::new(ThrottleMode::Frames { interval_frames: 1 });
        throttle.reset(ThrottleMarker::Frame(1));
        assert!(!throttle.should_fire(ThrottleMarker::Time(Instant::now())));
    }
}
