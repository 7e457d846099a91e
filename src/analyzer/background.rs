use crate::config::{BackgroundScore, DetectionConfig};
use image::{GrayImage, Luma};
use imageproc::{
    distance_transform::Norm,
    morphology::{dilate, erode},
    region_labelling::{connected_components, Connectivity},
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const INITIAL_VARIANCE: f32 = 225.0;
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 65_025.0;

/// Running per-pixel Gaussian background model.
///
/// A pixel is foreground when its squared deviation from the mean exceeds
/// `variance_threshold` variances and its absolute deviation exceeds
/// `pixel_diff_threshold`. Every pixel then adapts toward the frame at
/// `learning_rate`.
pub struct BackgroundSubtractor {
    pixel_diff_threshold: f32,
    variance_threshold: f32,
    learning_rate: f32,
    reset_interval: Option<Duration>,
    score_mode: BackgroundScore,
    min_component_area: u32,
    model: Option<BackgroundModel>,
}

struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    last_reset: Instant,
}

impl BackgroundModel {
    fn seed(luma: &GrayImage, at: Instant) -> Self {
        let (width, height) = luma.dimensions();
        Self {
            width,
            height,
            mean: luma.as_raw().iter().map(|&v| v as f32).collect(),
            variance: vec![INITIAL_VARIANCE; (width * height) as usize],
            last_reset: at,
        }
    }
}

impl BackgroundSubtractor {
    pub fn new(
        pixel_diff_threshold: u32,
        variance_threshold: f32,
        learning_rate: f32,
        reset_interval: Option<Duration>,
        score_mode: BackgroundScore,
        min_component_area: u32,
    ) -> Self {
        Self {
            pixel_diff_threshold: pixel_diff_threshold as f32,
            variance_threshold,
            learning_rate,
            reset_interval,
            score_mode,
            min_component_area,
            model: None,
        }
    }

    pub fn from_config(detection: &DetectionConfig) -> Self {
        Self::new(
            detection.pixel_diff_threshold,
            detection.variance_threshold as f32,
            detection.learning_rate as f32,
            detection.reset_interval(),
            detection.background_score,
            detection.min_component_area,
        )
    }

    pub fn score(&mut self, luma: &GrayImage, at: Instant) -> u64 {
        let seeded = self
            .model
            .as_ref()
            .is_some_and(|m| (m.width, m.height) == luma.dimensions());
        if !seeded {
            debug!("Seeding background model");
            self.model = Some(BackgroundModel::seed(luma, at));
            return 0;
        }

        let mask = self.segment(luma);
        let score = match self.score_mode {
            BackgroundScore::Pixels => mask.as_raw().iter().filter(|&&v| v > 0).count() as u64,
            BackgroundScore::Components => self.count_components(&mask),
        };

        if let Some(model) = self.model.as_mut() {
            let reset_due = self
                .reset_interval
                .is_some_and(|interval| at.saturating_duration_since(model.last_reset) > interval);
            if reset_due {
                debug!("Periodic background model reset");
                *model = BackgroundModel::seed(luma, at);
            }
        }

        score
    }

    /// Classify every pixel and adapt the model; returns the foreground mask
    fn segment(&mut self, luma: &GrayImage) -> GrayImage {
        let (width, height) = luma.dimensions();
        let mut mask = GrayImage::new(width, height);
        let Some(model) = self.model.as_mut() else {
            return mask;
        };

        let alpha = self.learning_rate;
        let pixels = luma
            .as_raw()
            .iter()
            .zip(model.mean.iter_mut().zip(model.variance.iter_mut()));

        for ((&value, (mean, variance)), out) in pixels.zip(mask.iter_mut()) {
            let deviation = value as f32 - *mean;
            let squared = deviation * deviation;

            if squared > self.variance_threshold * *variance
                && deviation.abs() > self.pixel_diff_threshold
            {
                *out = 255;
            }

            *mean += alpha * deviation;
            *variance = ((1.0 - alpha) * *variance + alpha * squared).clamp(MIN_VARIANCE, MAX_VARIANCE);
        }

        mask
    }

    /// Number of 8-connected foreground regions of at least `min_component_area`
    /// pixels, after a 3x3 opening removes speckle
    fn count_components(&self, mask: &GrayImage) -> u64 {
        let cleaned = dilate(&erode(mask, Norm::LInf, 1), Norm::LInf, 1);
        let labels = connected_components(&cleaned, Connectivity::Eight, Luma([0u8]));

        let mut areas: Vec<u32> = Vec::new();
        for label in labels.pixels().map(|p| p[0]).filter(|&l| l > 0) {
            let index = label as usize;
            if areas.len() < index {
                areas.resize(index, 0);
            }
            areas[index - 1] += 1;
        }

        areas
            .iter()
            .filter(|&&area| area >= self.min_component_area)
            .count() as u64
    }

    pub fn reset(&mut self) {
        self.model = None;
    }

    pub fn is_seeded(&self) -> bool {
        self.model.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8) -> GrayImage {
        GrayImage::from_pixel(40, 40, Luma([value]))
    }

    fn with_blocks(background: u8, blocks: &[(u32, u32, u32)]) -> GrayImage {
        let mut image = flat(background);
        for &(x0, y0, size) in blocks {
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    image.put_pixel(x, y, Luma([250]));
                }
            }
        }
        image
    }

    fn subtractor(mode: BackgroundScore) -> BackgroundSubtractor {
        BackgroundSubtractor::new(25, 16.0, 0.05, None, mode, 20)
    }

    #[test]
    fn test_first_frame_seeds() {
        let mut bg = subtractor(BackgroundScore::Pixels);
        assert_eq!(bg.score(&flat(50), Instant::now()), 0);
        assert!(bg.is_seeded());
    }

    #[test]
    fn test_static_scene_has_no_foreground() {
        let mut bg = subtractor(BackgroundScore::Pixels);
        let now = Instant::now();
        bg.score(&flat(50), now);
        for _ in 0..10 {
            assert_eq!(bg.score(&flat(50), now), 0);
        }
        // Small noise within both thresholds
        assert_eq!(bg.score(&flat(60), now), 0);
    }

    #[test]
    fn test_pixel_score_counts_foreground() {
        let mut bg = subtractor(BackgroundScore::Pixels);
        let now = Instant::now();
        bg.score(&flat(50), now);

        assert_eq!(bg.score(&with_blocks(50, &[(5, 5, 6)]), now), 36);
    }

    #[test]
    fn test_component_score_ignores_small_regions() {
        let mut bg = subtractor(BackgroundScore::Components);
        let now = Instant::now();
        bg.score(&flat(50), now);

        // Two large regions and one single-pixel speck
        let frame = with_blocks(50, &[(2, 2, 8), (25, 25, 10), (20, 5, 1)]);
        assert_eq!(bg.score(&frame, now), 2);
    }

    #[test]
    fn test_periodic_reset_relearns_scene() {
        let mut bg = BackgroundSubtractor::new(
            25,
            16.0,
            0.01,
            Some(Duration::from_secs(10)),
            BackgroundScore::Pixels,
            20,
        );
        let start = Instant::now();
        bg.score(&flat(50), start);

        let moved = flat(200);
        assert_eq!(bg.score(&moved, start + Duration::from_secs(5)), 1600);
        assert_eq!(bg.score(&moved, start + Duration::from_secs(11)), 1600);
        assert_eq!(bg.score(&moved, start + Duration::from_secs(12)), 0);
    }
}
