use crate::error::EncoderError;
use crate::frame::{EncodedUnit, FrameData, FrameFormat};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use tracing::trace;

#[cfg(all(feature = "camera", target_os = "linux"))]
use gstreamer::prelude::*;
#[cfg(all(feature = "camera", target_os = "linux"))]
use gstreamer::Pipeline;
#[cfg(all(feature = "camera", target_os = "linux"))]
use gstreamer_app::{AppSink, AppSrc};
#[cfg(all(feature = "camera", target_os = "linux"))]
use tracing::{debug, info, warn};

/// Turns captured frames into codec units for the pre-roll buffer and sink
pub trait Encoder: Send {
    /// File extension for recordings made with this encoder
    fn extension(&self) -> &'static str;

    /// Encode one frame. An encoder may emit zero or more units per frame.
    fn encode(&mut self, frame: &FrameData) -> Result<Vec<EncodedUnit>, EncoderError>;

    /// Make the next emitted unit a keyframe
    fn force_keyframe(&mut self);
}

/// One JPEG per frame. Every unit is a keyframe.
pub struct MjpegEncoder {
    quality: u8,
    frames_encoded: u64,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            frames_encoded: 0,
        }
    }

    fn compress(&self, frame: &FrameData, color: ColorType) -> Result<Vec<u8>, EncoderError> {
        if !frame.validate_size() {
            return Err(EncoderError::Encoding {
                details: format!(
                    "frame {} has {} bytes, expected {:?}",
                    frame.id,
                    frame.data.len(),
                    frame.expected_size()
                ),
            });
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode(&frame.data, frame.width, frame.height, color)
            .map_err(|e| EncoderError::Encoding {
                details: format!("JPEG encoding failed: {}", e),
            })?;
        Ok(jpeg)
    }
}

impl Encoder for MjpegEncoder {
    fn extension(&self) -> &'static str {
        "mjpeg"
    }

    fn encode(&mut self, frame: &FrameData) -> Result<Vec<EncodedUnit>, EncoderError> {
        let unit = match frame.format {
            // Already JPEG; share the capture buffer
            FrameFormat::Mjpeg => EncodedUnit {
                payload: frame.data.clone(),
                is_keyframe: true,
                timestamp: frame.timestamp,
            },
            FrameFormat::Gray8 => {
                EncodedUnit::new(self.compress(frame, ColorType::L8)?, true, frame.timestamp)
            }
            FrameFormat::Rgb24 => EncodedUnit::new(
                self.compress(frame, ColorType::Rgb8)?,
                true,
                frame.timestamp,
            ),
            other => {
                return Err(EncoderError::Unsupported {
                    format: format!("{:?}", other),
                })
            }
        };

        self.frames_encoded += 1;
        trace!(
            "Encoded frame {} as {} byte JPEG",
            frame.id,
            unit.payload.len()
        );
        Ok(vec![unit])
    }

    fn force_keyframe(&mut self) {}
}

/// H.264 encoder backed by a GStreamer x264 pipeline.
///
/// The pipeline is built lazily from the first frame's format and size, and
/// rebuilt if either changes.
#[cfg(all(feature = "camera", target_os = "linux"))]
pub struct GstH264Encoder {
    bitrate_kbps: u32,
    keyframe_interval: u32,
    fps: u32,
    pipeline: Option<H264Pipeline>,
    keyframe_requested: bool,
}

#[cfg(all(feature = "camera", target_os = "linux"))]
struct H264Pipeline {
    pipeline: Pipeline,
    appsrc: AppSrc,
    appsink: AppSink,
    format: FrameFormat,
    width: u32,
    height: u32,
}

#[cfg(all(feature = "camera", target_os = "linux"))]
impl Drop for H264Pipeline {
    fn drop(&mut self) {
        let _ = self.appsrc.end_of_stream();
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
impl GstH264Encoder {
    pub fn new(bitrate_kbps: u32, keyframe_interval: u32, fps: u32) -> Result<Self, EncoderError> {
        gstreamer::init().map_err(|e| EncoderError::Encoding {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        info!(
            "H.264 encoder configured ({} kbps, keyframe every {} frames)",
            bitrate_kbps, keyframe_interval
        );

        Ok(Self {
            bitrate_kbps,
            keyframe_interval,
            fps: fps.max(1),
            pipeline: None,
            keyframe_requested: false,
        })
    }

    fn input_caps(&self, frame: &FrameData) -> Result<(String, &'static str), EncoderError> {
        let (w, h, fps) = (frame.width, frame.height, self.fps);
        let raw = |format: &str| {
            format!(
                "video/x-raw,format={},width={},height={},framerate={}/1",
                format, w, h, fps
            )
        };

        Ok(match frame.format {
            FrameFormat::Mjpeg => (
                format!("image/jpeg,width={},height={},framerate={}/1", w, h, fps),
                "jpegparse ! jpegdec ! ",
            ),
            FrameFormat::Gray8 => (raw("GRAY8"), ""),
            FrameFormat::Rgb24 => (raw("RGB"), ""),
            FrameFormat::Yuyv => (raw("YUY2"), ""),
            FrameFormat::Yuv420 => (raw("I420"), ""),
        })
    }

    fn build_pipeline(&self, frame: &FrameData) -> Result<H264Pipeline, EncoderError> {
        let (caps, decode) = self.input_caps(frame)?;
        let pipeline_desc = format!(
            "appsrc name=src is-live=true format=time do-timestamp=true caps={} ! \
             {}videoconvert ! video/x-raw,format=I420 ! \
             x264enc tune=zerolatency speed-preset=ultrafast bitrate={} key-int-max={} ! \
             video/x-h264,stream-format=byte-stream,alignment=au ! \
             h264parse config-interval=-1 ! \
             appsink name=sink sync=false emit-signals=false",
            caps, decode, self.bitrate_kbps, self.keyframe_interval
        );

        debug!("H.264 pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| EncoderError::Encoding {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| EncoderError::Encoding {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.downcast::<AppSrc>().ok())
            .ok_or_else(|| EncoderError::Encoding {
                details: "Failed to get appsrc element".to_string(),
            })?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<AppSink>().ok())
            .ok_or_else(|| EncoderError::Encoding {
                details: "Failed to get appsink element".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| EncoderError::Encoding {
                details: format!("Failed to start pipeline: {}", e),
            })?;

        info!(
            "Started H.264 pipeline for {}x{} {:?} input",
            frame.width, frame.height, frame.format
        );

        Ok(H264Pipeline {
            pipeline,
            appsrc,
            appsink,
            format: frame.format,
            width: frame.width,
            height: frame.height,
        })
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
impl Encoder for GstH264Encoder {
    fn extension(&self) -> &'static str {
        "h264"
    }

    fn encode(&mut self, frame: &FrameData) -> Result<Vec<EncodedUnit>, EncoderError> {
        let stale = match &self.pipeline {
            Some(p) => p.format != frame.format || p.width != frame.width || p.height != frame.height,
            None => true,
        };
        if stale {
            if self.pipeline.is_some() {
                warn!("Input format changed; rebuilding H.264 pipeline");
            }
            self.pipeline = None;
            self.pipeline = Some(self.build_pipeline(frame)?);
        }

        let Some(active) = self.pipeline.as_ref() else {
            return Err(EncoderError::Encoding {
                details: "H.264 pipeline not initialized".to_string(),
            });
        };

        if self.keyframe_requested {
            let event = gstreamer_video::UpstreamForceKeyUnitEvent::builder()
                .all_headers(true)
                .build();
            if !active.appsink.send_event(event) {
                warn!("Encoder did not accept force-keyframe request");
            }
            self.keyframe_requested = false;
        }

        active
            .appsrc
            .push_buffer(gstreamer::Buffer::from_slice(frame.data.as_ref().clone()))
            .map_err(|e| EncoderError::Encoding {
                details: format!("Failed to push frame {}: {:?}", frame.id, e),
            })?;

        // The wait parks this worker thread, so hand its other tasks off first
        let units = blocking_wait(|| drain_encoded(&active.appsink, frame))?;

        trace!("Frame {} produced {} H.264 units", frame.id, units.len());
        Ok(units)
    }

    fn force_keyframe(&mut self) {
        self.keyframe_requested = true;
    }
}

/// zerolatency emits one access unit per frame; wait briefly for it, then drain
#[cfg(all(feature = "camera", target_os = "linux"))]
fn drain_encoded(appsink: &AppSink, frame: &FrameData) -> Result<Vec<EncodedUnit>, EncoderError> {
    let mut units = Vec::new();
    let mut wait = gstreamer::ClockTime::from_mseconds(200);
    while let Some(sample) = appsink.try_pull_sample(wait) {
        wait = gstreamer::ClockTime::ZERO;
        let Some(buffer) = sample.buffer() else {
            continue;
        };
        let map = buffer.map_readable().map_err(|e| EncoderError::Encoding {
            details: format!("Failed to map encoded buffer: {}", e),
        })?;
        let is_keyframe = !buffer.flags().contains(gstreamer::BufferFlags::DELTA_UNIT);
        units.push(EncodedUnit::new(
            map.as_slice().to_vec(),
            is_keyframe,
            frame.timestamp,
        ));
    }
    Ok(units)
}

/// Run a blocking wait from inside the driver task.
///
/// On a multi-threaded runtime the worker's other tasks move to another thread
/// for the duration; a current-thread runtime has nowhere to move them, so the
/// wait simply runs inline.
#[cfg(any(test, all(feature = "camera", target_os = "linux")))]
fn blocking_wait<R>(wait: impl FnOnce() -> R) -> R {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_mjpeg_passthrough_shares_buffer() {
        let frame = FrameData::new(
            7,
            Instant::now(),
            vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9],
            640,
            480,
            FrameFormat::Mjpeg,
        );
        let mut encoder = MjpegEncoder::new(85);

        let units = encoder.encode(&frame).unwrap();

        assert_eq!(units.len(), 1);
        assert!(units[0].is_keyframe);
        assert_eq!(units[0].timestamp, frame.timestamp);
        assert!(std::sync::Arc::ptr_eq(&units[0].payload, &frame.data));
        assert_eq!(encoder.extension(), "mjpeg");
    }

    #[test]
    fn test_mjpeg_compresses_gray_frames() {
        let data: Vec<u8> = (0..64 * 48).map(|i| (i % 251) as u8).collect();
        let frame = FrameData::new(1, Instant::now(), data, 64, 48, FrameFormat::Gray8);
        let mut encoder = MjpegEncoder::new(80);

        let units = encoder.encode(&frame).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].payload[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&units[0].payload).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_blocking_wait_keeps_other_tasks_running() {
        let waited = tokio::spawn(async {
            let (tx, rx) = std::sync::mpsc::channel();
            // Queued on this worker behind the task that is about to block
            tokio::spawn(async move {
                let _ = tx.send(());
            });
            blocking_wait(|| rx.recv_timeout(std::time::Duration::from_secs(5)).is_ok())
        })
        .await
        .unwrap();

        assert!(waited);
    }

    #[tokio::test]
    async fn test_blocking_wait_runs_inline_on_current_thread() {
        assert_eq!(blocking_wait(|| 7), 7);
    }

    #[test]
    fn test_mjpeg_rejects_bad_frames() {
        let mut encoder = MjpegEncoder::new(80);

        let truncated = FrameData::new(1, Instant::now(), vec![0; 10], 64, 48, FrameFormat::Gray8);
        assert!(matches!(
            encoder.encode(&truncated),
            Err(EncoderError::Encoding { .. })
        ));

        let yuyv = FrameData::new(2, Instant::now(), vec![0; 8], 2, 2, FrameFormat::Yuyv);
        assert!(matches!(
            encoder.encode(&yuyv),
            Err(EncoderError::Unsupported { .. })
        ));
    }
}
