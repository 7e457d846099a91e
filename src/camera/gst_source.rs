use crate::config::CameraConfig;
use crate::error::CaptureError;
use crate::frame::{Flip, FrameData, FrameFormat};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::handoff::{latest_frame_channel, LatestReceiver};
use super::interface::FrameSource;

/// V4L2 MJPEG camera captured through a GStreamer pipeline.
///
/// The appsink streaming thread publishes each sample into a single-slot
/// handoff; `next_frame` takes the most recent one. When the driver runs slower
/// than the camera, older samples are dropped instead of queueing up.
pub struct GstFrameSource {
    config: CameraConfig,
    flip: Flip,
    pipeline: Option<Pipeline>,
    samples: Option<LatestReceiver<(gstreamer::Sample, Instant)>>,
    frame_counter: u64,
}

impl GstFrameSource {
    pub fn new(config: CameraConfig) -> Result<Self, CaptureError> {
        gstreamer::init().map_err(|e| CaptureError::Pipeline {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        info!(
            "Initializing GStreamer camera for device {} ({}x{} @ {}fps)",
            config.index, config.resolution.0, config.resolution.1, config.fps
        );

        Ok(Self {
            flip: Flip::new(config.flip_horizontal, config.flip_vertical),
            config,
            pipeline: None,
            samples: None,
            frame_counter: 0,
        })
    }

    /// MJPEG capture, re-encoded through `videoflip` only when a flip is requested
    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        let flip = match self.flip.video_direction() {
            Some(direction) => format!(
                "jpegdec ! videoflip video-direction={} ! jpegenc quality=90 ! ",
                direction
            ),
            None => String::new(),
        };

        format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             {}queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=1 drop=true qos=false enable-last-sample=false emit-signals=false",
            self.config.index, width, height, self.config.fps, flip
        )
    }

    fn launch(&mut self) -> Result<(), CaptureError> {
        let pipeline_desc = self.build_pipeline_string();
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CaptureError::Pipeline {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CaptureError::Pipeline {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<AppSink>().ok())
            .ok_or_else(|| CaptureError::Pipeline {
                details: "Failed to get appsink element".to_string(),
            })?;

        let (tx, rx) = latest_frame_channel();
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    // Receiver gone means the source is shutting down
                    if tx.publish((sample, Instant::now())) {
                        Ok(gstreamer::FlowSuccess::Ok)
                    } else {
                        Err(gstreamer::FlowError::Flushing)
                    }
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CaptureError::Device {
                details: format!(
                    "Failed to start capture on /dev/video{}: {}",
                    self.config.index, e
                ),
            })?;

        self.pipeline = Some(pipeline);
        self.samples = Some(rx);
        Ok(())
    }

    fn shutdown_pipeline(&mut self) {
        self.samples = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                error!("Failed to stop GStreamer pipeline: {}", e);
            }
        }
    }

    /// First error message waiting on the pipeline bus, if any
    fn pending_bus_error(&self) -> Option<String> {
        let bus = self.pipeline.as_ref()?.bus()?;
        let message = bus.pop_filtered(&[gstreamer::MessageType::Error])?;
        match message.view() {
            gstreamer::MessageView::Error(err) => {
                Some(format!("{} ({:?})", err.error(), err.debug()))
            }
            _ => None,
        }
    }

    fn sample_to_frame(
        &mut self,
        sample: gstreamer::Sample,
        timestamp: Instant,
    ) -> Result<FrameData, CaptureError> {
        let buffer = sample.buffer().ok_or_else(|| CaptureError::Pipeline {
            details: "No buffer in sample".to_string(),
        })?;

        // image/jpeg caps carry the size; fall back to the requested resolution
        let (width, height) = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .and_then(|s| Some((s.get::<i32>("width").ok()?, s.get::<i32>("height").ok()?)))
            .map(|(w, h)| (w as u32, h as u32))
            .unwrap_or(self.config.resolution);

        let map = buffer.map_readable().map_err(|e| CaptureError::Pipeline {
            details: format!("Failed to map buffer: {}", e),
        })?;

        let frame_id = self.frame_counter;
        self.frame_counter += 1;

        trace!(
            "Captured MJPEG frame {} ({}x{}, {} bytes)",
            frame_id,
            width,
            height,
            map.len()
        );

        Ok(FrameData::new(
            frame_id,
            timestamp,
            map.as_slice().to_vec(),
            width,
            height,
            FrameFormat::Mjpeg,
        ))
    }
}

#[async_trait]
impl FrameSource for GstFrameSource {
    fn name(&self) -> &str {
        "gstreamer"
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.pipeline.is_some() {
            warn!("GStreamer camera capture is already running");
            return Ok(());
        }
        self.launch()?;
        info!("GStreamer pipeline started successfully");
        Ok(())
    }

    async fn next_frame(&mut self, timeout: Duration) -> Result<FrameData, CaptureError> {
        let Some(samples) = self.samples.as_mut() else {
            return Err(CaptureError::StreamEnded);
        };

        match tokio::time::timeout(timeout, samples.recv()).await {
            Ok(Some((sample, timestamp))) => self.sample_to_frame(sample, timestamp),
            Ok(None) => Err(CaptureError::StreamEnded),
            Err(_) => match self.pending_bus_error() {
                Some(details) => Err(CaptureError::Pipeline { details }),
                None => Err(CaptureError::Timeout { timeout }),
            },
        }
    }

    async fn reinitialize(&mut self) -> Result<(), CaptureError> {
        info!("Restarting GStreamer camera pipeline");
        self.shutdown_pipeline();
        self.launch()
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if self.pipeline.is_none() {
            debug!("GStreamer camera capture is not running");
            return Ok(());
        }
        self.shutdown_pipeline();
        info!(
            "GStreamer camera capture stopped after {} frames",
            self.frame_counter
        );
        Ok(())
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        self.shutdown_pipeline();
    }
}
