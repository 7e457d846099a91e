use super::*;
use crate::config::MotionCamConfig;
use crate::error::CaptureError;
use crate::frame::{Flip, FrameFormat};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(100);

/// Mean column of pixels brighter than the background in a Gray8 frame
fn bright_centroid_x(data: &[u8], width: u32) -> Option<f64> {
    let columns: Vec<u32> = data
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v > 128)
        .map(|(i, _)| i as u32 % width)
        .collect();
    if columns.is_empty() {
        None
    } else {
        Some(columns.iter().map(|&c| c as f64).sum::<f64>() / columns.len() as f64)
    }
}

#[tokio::test]
async fn test_synthetic_source_requires_start() {
    let mut source = SyntheticFrameSource::new((64, 48), Flip::default());

    assert!(matches!(
        source.next_frame(TIMEOUT).await,
        Err(CaptureError::StreamEnded)
    ));

    source.start().await.unwrap();
    assert!(source.next_frame(TIMEOUT).await.is_ok());

    source.stop().await.unwrap();
    source.stop().await.unwrap();
    assert!(source.next_frame(TIMEOUT).await.is_err());
}

#[tokio::test]
async fn test_synthetic_frames_are_sequential_gray() {
    let mut source = SyntheticFrameSource::new((64, 48), Flip::default());
    source.start().await.unwrap();

    for expected_id in 0..5 {
        let frame = source.next_frame(TIMEOUT).await.unwrap();
        assert_eq!(frame.id, expected_id);
        assert_eq!(frame.format, FrameFormat::Gray8);
        assert_eq!((frame.width, frame.height), (64, 48));
        assert!(frame.validate_size());
    }

    source.stop().await.unwrap();
    assert!(matches!(
        source.next_frame(TIMEOUT).await,
        Err(CaptureError::StreamEnded)
    ));
}

#[tokio::test]
async fn test_synthetic_motion_bursts() {
    let mut source = SyntheticFrameSource::new((64, 48), Flip::default()).with_motion(10, 3);
    source.start().await.unwrap();

    for id in 0..20u64 {
        let frame = source.next_frame(TIMEOUT).await.unwrap();
        let has_block = bright_centroid_x(&frame.data, frame.width).is_some();
        assert_eq!(has_block, id % 10 < 3, "frame {}", id);
        assert_eq!(has_block, source.is_motion_frame(id));
    }
}

#[tokio::test]
async fn test_synthetic_flip_mirrors_block() {
    let mut plain = SyntheticFrameSource::new((64, 48), Flip::default()).with_motion(10, 10);
    let mut mirrored =
        SyntheticFrameSource::new((64, 48), Flip::new(true, false)).with_motion(10, 10);
    plain.start().await.unwrap();
    mirrored.start().await.unwrap();

    let a = plain.next_frame(TIMEOUT).await.unwrap();
    let b = mirrored.next_frame(TIMEOUT).await.unwrap();

    let left = bright_centroid_x(&a.data, 64).unwrap();
    let right = bright_centroid_x(&b.data, 64).unwrap();
    assert!((left + right - 63.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_synthetic_from_config() {
    let mut config = MotionCamConfig::default().camera;
    config.resolution = (80, 60);
    config.fps = 5;

    let mut source = SyntheticFrameSource::from_config(&config);
    assert_eq!(source.name(), "synthetic");
    assert!(source.is_motion_frame(14));
    assert!(!source.is_motion_frame(15));
    assert!(source.is_motion_frame(100));

    source.start().await.unwrap();
    source.reinitialize().await.unwrap();
    let frame = source.next_frame(TIMEOUT).await.unwrap();
    assert_eq!((frame.width, frame.height), (80, 60));
}

#[tokio::test]
async fn test_latest_frame_handoff_drops_stale_frames() {
    let (tx, mut rx) = handoff::latest_frame_channel::<u64>();

    // Camera outpaces the driver: only the newest capture is handed over
    for id in 0..5 {
        assert!(tx.publish(id));
    }
    assert_eq!(rx.recv().await, Some(4));

    assert!(tx.publish(5));
    assert!(tx.publish(6));
    assert_eq!(rx.recv().await, Some(6));

    // Nothing new yet: the receiver waits rather than repeating a frame
    assert!(tokio::time::timeout(TIMEOUT, rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_latest_frame_handoff_preserves_capture_order() {
    let (tx, mut rx) = handoff::latest_frame_channel::<u64>();

    let producer = tokio::spawn(async move {
        for id in 0..200 {
            if !tx.publish(id) {
                break;
            }
            tokio::task::yield_now().await;
        }
    });

    let mut received = Vec::new();
    while let Some(id) = rx.recv().await {
        received.push(id);
    }
    producer.await.unwrap();

    assert!(!received.is_empty());
    assert!(received.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_latest_frame_handoff_reports_closed_ends() {
    let (tx, rx) = handoff::latest_frame_channel::<u64>();
    drop(rx);
    assert!(!tx.publish(1));

    let (tx, mut rx) = handoff::latest_frame_channel::<u64>();
    drop(tx);
    assert_eq!(rx.recv().await, None);
}
