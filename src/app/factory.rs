use crate::analyzer::{FrameDifferencer, MotionDebouncer};
use crate::camera::{FrameSource, SyntheticFrameSource};
use crate::capture::{Encoder, FileSink, MjpegEncoder, RecordingController, RecordingSettings};
use crate::clock::{Clock, SystemClock};
use crate::config::{CameraSource, EncoderKind, MotionCamConfig};
use crate::error::{MotionCamError, Result};
use crate::events::EventBus;
use crate::preroll::PreRollBufferBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::driver::{MotionDriver, MotionDriverBuilder};
use super::types::DriverSettings;

/// Open the configured frame source (not yet started)
pub fn build_frame_source(config: &MotionCamConfig) -> Result<Box<dyn FrameSource>> {
    match config.camera.source {
        CameraSource::Synthetic => Ok(Box::new(SyntheticFrameSource::from_config(
            &config.camera,
        ))),
        #[cfg(all(feature = "camera", target_os = "linux"))]
        CameraSource::Gstreamer => Ok(Box::new(crate::camera::GstFrameSource::new(
            config.camera.clone(),
        )?)),
        #[cfg(not(all(feature = "camera", target_os = "linux")))]
        CameraSource::Gstreamer => Err(MotionCamError::component(
            "camera",
            "GStreamer capture requires the 'camera' feature on Linux",
        )),
    }
}

pub fn build_encoder(config: &MotionCamConfig) -> Result<Box<dyn Encoder>> {
    match config.recording.encoder {
        EncoderKind::Mjpeg => Ok(Box::new(MjpegEncoder::new(config.recording.jpeg_quality))),
        #[cfg(all(feature = "camera", target_os = "linux"))]
        EncoderKind::H264 => Ok(Box::new(crate::capture::GstH264Encoder::new(
            config.recording.bitrate_kbps,
            config.recording.keyframe_interval,
            config.camera.fps,
        )?)),
        #[cfg(not(all(feature = "camera", target_os = "linux")))]
        EncoderKind::H264 => Err(MotionCamError::component(
            "encoder",
            "H.264 encoding requires the 'camera' feature on Linux",
        )),
    }
}

/// Recording controller writing to files under `recording.output_dir`
pub fn build_controller(config: &MotionCamConfig, extension: &str) -> Result<RecordingController> {
    let preroll = config
        .recording
        .pre_roll_window()
        .map(|window| PreRollBufferBuilder::new().window(window).build())
        .transpose()?;

    Ok(RecordingController::new(
        RecordingSettings::from_config(&config.recording, extension),
        Box::new(FileSink::new()),
        preroll,
    ))
}

/// Assemble a driver from configuration with the system clock
pub fn build_driver(
    config: &MotionCamConfig,
    event_bus: EventBus,
    cancel: CancellationToken,
) -> Result<MotionDriver> {
    build_driver_with_clock(config, event_bus, cancel, Arc::new(SystemClock))
}

pub fn build_driver_with_clock(
    config: &MotionCamConfig,
    event_bus: EventBus,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
) -> Result<MotionDriver> {
    config.validate().map_err(MotionCamError::Config)?;

    let encoder = build_encoder(config)?;
    let controller = build_controller(config, encoder.extension())?;
    let source = build_frame_source(config)?;

    info!(
        "Building motion driver ({:?} source, {:?} detection, {} recordings in {})",
        config.camera.source,
        config.detection.method,
        encoder.extension(),
        config.recording.output_dir
    );

    MotionDriverBuilder::new(DriverSettings::from_config(config))
        .source(source)
        .differencer(FrameDifferencer::from_config(
            &config.camera,
            &config.detection,
        ))
        .debouncer(MotionDebouncer::from_config(&config.detection))
        .controller(controller)
        .encoder(encoder)
        .clock(clock)
        .event_bus(event_bus)
        .cancellation_token(cancel)
        .build()
}
