use super::*;
use crate::config::{BackgroundScore, DetectionConfig, DetectionMethod, MotionCamConfig};
use crate::frame::{FrameData, FrameFormat};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::time::Duration;
use tokio::time::Instant;

fn detection(method: DetectionMethod) -> DetectionConfig {
    let mut detection = MotionCamConfig::default().detection;
    detection.method = method;
    detection
}

/// Gray frame with a bright square of `block` pixels in the top-left corner
fn gray_frame(id: u64, at: Instant, (width, height): (u32, u32), block: u32) -> FrameData {
    let mut data = vec![40u8; (width * height) as usize];
    for y in 0..block {
        for x in 0..block {
            data[(y * width + x) as usize] = 250;
        }
    }
    FrameData::new(id, at, data, width, height, FrameFormat::Gray8)
}

fn jpeg_frame(id: u64, at: Instant, source: &FrameData) -> FrameData {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 95)
        .encode(&source.data, source.width, source.height, ColorType::L8)
        .unwrap();
    FrameData::new(id, at, jpeg, source.width, source.height, FrameFormat::Mjpeg)
}

#[test]
fn test_absolute_scoring_at_motion_resolution() {
    let mut differencer = FrameDifferencer::new((32, 24), &detection(DetectionMethod::Absolute));
    let now = Instant::now();

    assert_eq!(differencer.score(&gray_frame(1, now, (32, 24), 0)).unwrap(), 0);
    assert_eq!(differencer.score(&gray_frame(2, now, (32, 24), 10)).unwrap(), 100);
    assert_eq!(differencer.score(&gray_frame(3, now, (32, 24), 10)).unwrap(), 0);
    assert_eq!(differencer.frames_scored(), 3);
}

#[test]
fn test_frames_are_downscaled_before_scoring() {
    let mut differencer = FrameDifferencer::new((32, 24), &detection(DetectionMethod::Absolute));
    let now = Instant::now();

    differencer.score(&gray_frame(1, now, (64, 48), 0)).unwrap();
    let changed = differencer.score(&gray_frame(2, now, (64, 48), 32)).unwrap();

    // A 32x32 block covers 16x16 pixels at half resolution, plus filter bleed
    assert!((256..=324).contains(&changed), "changed = {}", changed);
}

#[test]
fn test_mjpeg_frames_are_decoded() {
    let mut differencer = FrameDifferencer::new((32, 24), &detection(DetectionMethod::Absolute));
    let now = Instant::now();

    let still = gray_frame(0, now, (32, 24), 0);
    let moving = gray_frame(0, now, (32, 24), 12);

    differencer.score(&jpeg_frame(1, now, &still)).unwrap();
    assert_eq!(differencer.score(&jpeg_frame(2, now, &still)).unwrap(), 0);
    assert!(differencer.score(&jpeg_frame(3, now, &moving)).unwrap() >= 100);
}

#[test]
fn test_corrupt_frame_is_an_error_and_not_scored() {
    let mut differencer = FrameDifferencer::new((32, 24), &detection(DetectionMethod::Absolute));
    let truncated = FrameData::new(1, Instant::now(), vec![0; 10], 32, 24, FrameFormat::Gray8);

    assert!(differencer.score(&truncated).is_err());
    assert_eq!(differencer.frames_scored(), 0);
}

#[test]
fn test_reset_reseeds_reference() {
    let mut differencer = FrameDifferencer::new((32, 24), &detection(DetectionMethod::Absolute));
    let now = Instant::now();

    differencer.score(&gray_frame(1, now, (32, 24), 0)).unwrap();
    differencer.reset();
    assert_eq!(differencer.score(&gray_frame(2, now, (32, 24), 10)).unwrap(), 0);
}

#[test]
fn test_background_method_counts_foreground_pixels() {
    let mut differencer =
        FrameDifferencer::new((32, 24), &detection(DetectionMethod::Background));
    let start = Instant::now();

    differencer.score(&gray_frame(1, start, (32, 24), 0)).unwrap();
    for id in 2..6 {
        let at = start + Duration::from_millis(id * 100);
        assert_eq!(differencer.score(&gray_frame(id, at, (32, 24), 0)).unwrap(), 0);
    }

    let at = start + Duration::from_secs(1);
    assert_eq!(differencer.score(&gray_frame(6, at, (32, 24), 8)).unwrap(), 64);
}

#[test]
fn test_background_components_score() {
    let mut config = detection(DetectionMethod::Background);
    config.background_score = BackgroundScore::Components;
    config.min_component_area = 50;
    let mut differencer = FrameDifferencer::new((32, 24), &config);
    let now = Instant::now();

    differencer.score(&gray_frame(1, now, (32, 24), 0)).unwrap();
    // 8x8 = 64 pixels forms one region above the minimum area
    assert_eq!(differencer.score(&gray_frame(2, now, (32, 24), 8)).unwrap(), 1);

    let mut small = detection(DetectionMethod::Background);
    small.background_score = BackgroundScore::Components;
    small.min_component_area = 50;
    let mut differencer = FrameDifferencer::new((32, 24), &small);
    differencer.score(&gray_frame(1, now, (32, 24), 0)).unwrap();
    // 5x5 = 25 pixels is below it
    assert_eq!(differencer.score(&gray_frame(2, now, (32, 24), 5)).unwrap(), 0);
}

#[test]
fn test_scores_feed_debouncer() {
    let mut differencer = FrameDifferencer::new((32, 24), &detection(DetectionMethod::Absolute));
    let mut debouncer = MotionDebouncer::new(50, Duration::from_secs(1));
    let start = Instant::now();

    let blocks = [0, 0, 10, 10, 0, 0];
    let active: Vec<bool> = blocks
        .iter()
        .enumerate()
        .map(|(i, &block)| {
            let at = start + Duration::from_millis(i as u64 * 100);
            let changed = differencer
                .score(&gray_frame(i as u64, at, (32, 24), block))
                .unwrap();
            debouncer.update(changed, at)
        })
        .collect();

    assert_eq!(active, vec![false, false, true, true, true, true]);
}
