use crate::config::DetectionConfig;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Per-cycle motion signal as seen by the recording controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionSignal {
    pub raw_changed_count: u64,
    pub is_motion_raw: bool,
    pub is_motion_debounced: bool,
    pub hold_until: Option<Instant>,
}

/// Hold-window hysteresis over the raw change score.
///
/// A count above `sensitivity_threshold` keeps motion active for `hold` after
/// that cycle. While a cooldown is in effect motion is forced inactive.
#[derive(Debug, Clone)]
pub struct MotionDebouncer {
    sensitivity_threshold: u64,
    hold: Duration,
    cooldown_until: Option<Instant>,
    signal: MotionSignal,
}

impl MotionDebouncer {
    pub fn new(sensitivity_threshold: u64, hold: Duration) -> Self {
        Self {
            sensitivity_threshold,
            hold,
            cooldown_until: None,
            signal: MotionSignal::default(),
        }
    }

    pub fn from_config(detection: &DetectionConfig) -> Self {
        Self::new(detection.sensitivity_threshold, detection.motion_buffer())
    }

    /// Fold one cycle's score into the signal; returns whether motion is active
    pub fn update(&mut self, changed_count: u64, now: Instant) -> bool {
        let is_motion_raw = changed_count > self.sensitivity_threshold;

        let active = if self.cooldown_until.is_some_and(|until| now < until) {
            if is_motion_raw {
                debug!("Motion ({} changed) suppressed by cooldown", changed_count);
            }
            false
        } else if is_motion_raw {
            self.signal.hold_until = Some(now + self.hold);
            true
        } else {
            self.signal.hold_until.is_some_and(|until| now <= until)
        };

        if active != self.signal.is_motion_debounced {
            info!(
                "Motion {} ({} changed)",
                if active { "detected" } else { "cleared" },
                changed_count
            );
        }

        self.signal.raw_changed_count = changed_count;
        self.signal.is_motion_raw = is_motion_raw;
        self.signal.is_motion_debounced = active;
        active
    }

    /// Suppress motion until `until`. Any pending hold window is discarded.
    pub fn begin_cooldown(&mut self, until: Instant) {
        self.cooldown_until = Some(until);
        self.signal.hold_until = None;
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown_until
    }

    pub fn signal(&self) -> MotionSignal {
        self.signal
    }

    pub fn is_active(&self) -> bool {
        self.signal.is_motion_debounced
    }
}
