use crate::config::MotionCamConfig;
use std::fmt;
use std::time::Duration;

/// Why the driver loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The cancellation token fired (signal or caller request)
    Cancelled,
    /// The frame source failed to start, or failed too many times in a row
    CaptureFailed(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Cancelled => write!(f, "cancelled"),
            ShutdownReason::CaptureFailed(e) => write!(f, "capture failed: {}", e),
        }
    }
}

/// Loop timing and failure policy
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub cycle_interval: Duration,
    pub frame_timeout: Duration,
    pub max_capture_failures: u32,
    pub restart_after_recording: bool,
}

impl DriverSettings {
    pub fn from_config(config: &MotionCamConfig) -> Self {
        Self {
            cycle_interval: config.system.cycle_interval(),
            frame_timeout: config.camera.frame_timeout(),
            max_capture_failures: config.system.max_capture_failures.max(1),
            restart_after_recording: config.camera.restart_after_recording,
        }
    }
}

/// Driver loop counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub frames_processed: u64,
    pub capture_failures: u64,
    pub analyzer_errors: u64,
    pub encoder_errors: u64,
    pub motion_events: u64,
    pub source_restarts: u64,
}
