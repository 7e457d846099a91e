use crate::config::CameraConfig;
use crate::error::CaptureError;
use crate::frame::{Flip, FrameData, FrameFormat};
use async_trait::async_trait;
use image::{GrayImage, Luma};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::interface::FrameSource;

const BACKGROUND_LEVEL: u8 = 64;
const NOISE_AMPLITUDE: u8 = 8;
const BLOCK_LEVEL: u8 = 220;

/// Deterministic frame generator: a noisy flat background with a bright block
/// that sweeps across the scene for `active_frames` out of every `period_frames`.
pub struct SyntheticFrameSource {
    resolution: (u32, u32),
    flip: Flip,
    period_frames: u64,
    active_frames: u64,
    frame_counter: u64,
    noise_state: u64,
    running: bool,
}

impl SyntheticFrameSource {
    pub fn new(resolution: (u32, u32), flip: Flip) -> Self {
        Self {
            resolution,
            flip,
            period_frames: 200,
            active_frames: 30,
            frame_counter: 0,
            noise_state: 0x9E37_79B9_7F4A_7C15,
            running: false,
        }
    }

    /// A motion burst of roughly 3 s every 20 s at the configured frame rate
    pub fn from_config(config: &CameraConfig) -> Self {
        let fps = u64::from(config.fps.max(1));
        Self::new(
            config.resolution,
            Flip::new(config.flip_horizontal, config.flip_vertical),
        )
        .with_motion(fps * 20, fps * 3)
    }

    pub fn with_motion(mut self, period_frames: u64, active_frames: u64) -> Self {
        self.period_frames = period_frames.max(1);
        self.active_frames = active_frames.min(self.period_frames);
        self
    }

    /// Whether the frame with this id carries the moving block
    pub fn is_motion_frame(&self, frame_id: u64) -> bool {
        frame_id % self.period_frames < self.active_frames
    }

    fn next_noise(&mut self) -> u8 {
        // xorshift64
        let mut x = self.noise_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.noise_state = x;
        (x % u64::from(NOISE_AMPLITUDE)) as u8
    }

    fn render(&mut self, frame_id: u64) -> GrayImage {
        let (width, height) = self.resolution;
        let mut image = GrayImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Luma([BACKGROUND_LEVEL + self.next_noise()]);
        }

        if self.is_motion_frame(frame_id) {
            let size = (height / 4).clamp(1, width);
            let travel = (width - size).max(1);
            let step = (size / 8).max(1);
            let phase = frame_id % self.period_frames;
            let x0 = ((phase * u64::from(step)) % u64::from(travel)) as u32;
            let y0 = (height - size.min(height)) / 3;

            for y in y0..(y0 + size).min(height) {
                for x in x0..(x0 + size).min(width) {
                    image.put_pixel(x, y, Luma([BLOCK_LEVEL]));
                }
            }
        }

        self.flip.apply_gray(&mut image);
        image
    }
}

#[async_trait]
impl FrameSource for SyntheticFrameSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        info!(
            "Synthetic frame source started ({}x{}, motion {} of every {} frames)",
            self.resolution.0, self.resolution.1, self.active_frames, self.period_frames
        );
        self.running = true;
        Ok(())
    }

    async fn next_frame(&mut self, _timeout: Duration) -> Result<FrameData, CaptureError> {
        if !self.running {
            return Err(CaptureError::StreamEnded);
        }

        let frame_id = self.frame_counter;
        self.frame_counter += 1;

        let image = self.render(frame_id);
        let (width, height) = image.dimensions();
        trace!("Generated synthetic frame {}", frame_id);

        Ok(FrameData::new(
            frame_id,
            Instant::now(),
            image.into_raw(),
            width,
            height,
            FrameFormat::Gray8,
        ))
    }

    async fn reinitialize(&mut self) -> Result<(), CaptureError> {
        debug!("Synthetic frame source reinitialized");
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if self.running {
            info!(
                "Synthetic frame source stopped after {} frames",
                self.frame_counter
            );
        }
        self.running = false;
        Ok(())
    }
}
