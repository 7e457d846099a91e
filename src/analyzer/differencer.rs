use crate::config::{CameraConfig, DetectionConfig, DetectionMethod, ReferenceUpdate};
use crate::error::AnalyzerError;
use crate::frame::FrameData;
use image::GrayImage;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::background::BackgroundSubtractor;
use super::luma::{downscale, frame_to_luma};

/// Scores frames for change against a reference built from earlier frames
pub struct FrameDifferencer {
    motion_resolution: (u32, u32),
    strategy: Strategy,
    frames_scored: u64,
}

enum Strategy {
    Absolute(AbsoluteDifferencer),
    Background(BackgroundSubtractor),
}

impl FrameDifferencer {
    pub fn new(motion_resolution: (u32, u32), detection: &DetectionConfig) -> Self {
        let strategy = match detection.method {
            DetectionMethod::Absolute => Strategy::Absolute(AbsoluteDifferencer::new(
                detection.pixel_diff_threshold,
                detection.reference_update,
                detection.learning_rate as f32,
                detection.reset_interval(),
            )),
            DetectionMethod::Background => {
                Strategy::Background(BackgroundSubtractor::from_config(detection))
            }
        };

        info!(
            "Frame differencer using {:?} detection at {}x{}",
            detection.method, motion_resolution.0, motion_resolution.1
        );

        Self {
            motion_resolution,
            strategy,
            frames_scored: 0,
        }
    }

    pub fn from_config(camera: &CameraConfig, detection: &DetectionConfig) -> Self {
        Self::new(camera.motion_resolution, detection)
    }

    /// Count of changed pixels (or foreground regions) in `frame`.
    ///
    /// The first frame, and the first after a size change, seeds the model and
    /// scores zero.
    pub fn score(&mut self, frame: &FrameData) -> Result<u64, AnalyzerError> {
        let luma = downscale(frame_to_luma(frame)?, self.motion_resolution);
        let changed = self.score_luma(&luma, frame.timestamp);

        debug!("Frame {} changed_count = {}", frame.id, changed);
        Ok(changed)
    }

    /// Score an intensity image already at motion resolution
    pub fn score_luma(&mut self, luma: &GrayImage, at: Instant) -> u64 {
        self.frames_scored += 1;
        match &mut self.strategy {
            Strategy::Absolute(differencer) => differencer.score(luma, at),
            Strategy::Background(subtractor) => subtractor.score(luma, at),
        }
    }

    /// Drop the reference so the next frame reseeds it
    pub fn reset(&mut self) {
        match &mut self.strategy {
            Strategy::Absolute(differencer) => differencer.reset(),
            Strategy::Background(subtractor) => subtractor.reset(),
        }
    }

    pub fn frames_scored(&self) -> u64 {
        self.frames_scored
    }

    pub fn motion_resolution(&self) -> (u32, u32) {
        self.motion_resolution
    }
}

/// Per-pixel absolute difference against a reference frame
pub struct AbsoluteDifferencer {
    pixel_diff_threshold: u16,
    update: ReferenceUpdate,
    learning_rate: f32,
    reset_interval: Option<Duration>,
    reference: Option<Reference>,
}

struct Reference {
    width: u32,
    height: u32,
    values: Vec<f32>,
    last_reset: Instant,
}

impl Reference {
    fn seed(luma: &GrayImage, at: Instant) -> Self {
        let (width, height) = luma.dimensions();
        Self {
            width,
            height,
            values: luma.as_raw().iter().map(|&v| v as f32).collect(),
            last_reset: at,
        }
    }

    fn matches(&self, luma: &GrayImage) -> bool {
        (self.width, self.height) == luma.dimensions()
    }
}

impl AbsoluteDifferencer {
    pub fn new(
        pixel_diff_threshold: u32,
        update: ReferenceUpdate,
        learning_rate: f32,
        reset_interval: Option<Duration>,
    ) -> Self {
        Self {
            pixel_diff_threshold: pixel_diff_threshold.min(255) as u16,
            update,
            learning_rate,
            reset_interval,
            reference: None,
        }
    }

    pub fn score(&mut self, luma: &GrayImage, at: Instant) -> u64 {
        if !self.reference.as_ref().is_some_and(|r| r.matches(luma)) {
            debug!("Seeding reference frame");
            self.reference = Some(Reference::seed(luma, at));
            return 0;
        }
        let Some(reference) = self.reference.as_mut() else {
            return 0;
        };

        let threshold = self.pixel_diff_threshold;
        let changed = luma
            .as_raw()
            .iter()
            .zip(&reference.values)
            .filter(|&(&current, &model)| {
                (current as i16 - model.round() as i16).unsigned_abs() > threshold
            })
            .count() as u64;

        match self.update {
            ReferenceUpdate::Replace => {
                *reference = Reference::seed(luma, reference.last_reset);
            }
            ReferenceUpdate::Decay => {
                let reset_due = self
                    .reset_interval
                    .is_some_and(|interval| at.saturating_duration_since(reference.last_reset) > interval);

                if reset_due {
                    debug!("Periodic reference reset");
                    *reference = Reference::seed(luma, at);
                } else {
                    let alpha = self.learning_rate;
                    for (model, &current) in reference.values.iter_mut().zip(luma.as_raw()) {
                        *model = (1.0 - alpha) * *model + alpha * current as f32;
                    }
                }
            }
        }

        changed
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.reference.is_some()
    }
}
