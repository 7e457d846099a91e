use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

/// Frame format enumeration supporting the layouts a frame source may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// YUV 4:2:2 packed format (Y0 U Y1 V)
    Yuyv,
    /// YUV 4:2:0 planar format, luma plane first
    Yuv420,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
    /// Single-channel 8-bit luma
    Gray8,
}

impl FrameFormat {
    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }

    /// Expected buffer size for a frame of the given dimensions, `None` when compressed
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            FrameFormat::Mjpeg => None,
            FrameFormat::Yuyv => Some(pixels * 2),
            FrameFormat::Yuv420 => Some(pixels + 2 * (pixels / 4)),
            FrameFormat::Rgb24 => Some(pixels * 3),
            FrameFormat::Gray8 => Some(pixels),
        }
    }
}

/// Horizontal / vertical mirroring requested for the capture stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flip {
    pub horizontal: bool,
    pub vertical: bool,
}

impl Flip {
    pub fn new(horizontal: bool, vertical: bool) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }

    pub fn is_identity(&self) -> bool {
        !self.horizontal && !self.vertical
    }

    /// GStreamer `videoflip` direction for this flip, if any
    pub fn video_direction(&self) -> Option<&'static str> {
        match (self.horizontal, self.vertical) {
            (true, true) => Some("180"),
            (true, false) => Some("horiz"),
            (false, true) => Some("vert"),
            (false, false) => None,
        }
    }

    /// Mirror a grayscale image in place
    pub fn apply_gray(&self, image: &mut image::GrayImage) {
        if self.horizontal {
            image::imageops::flip_horizontal_in_place(image);
        }
        if self.vertical {
            image::imageops::flip_vertical_in_place(image);
        }
    }
}

/// A captured frame. Owned by the capture pipeline; the motion core only borrows it.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier
    pub id: u64,
    /// Monotonic capture time
    pub timestamp: Instant,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        id: u64,
        timestamp: Instant,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        self.format.frame_size(self.width, self.height)
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => !self.data.is_empty(),
        }
    }
}

/// One codec output unit, tagged for keyframe-aligned pre-roll flushing
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    pub payload: Arc<Vec<u8>>,
    pub is_keyframe: bool,
    pub timestamp: Instant,
}

impl EncodedUnit {
    pub fn new(payload: Vec<u8>, is_keyframe: bool, timestamp: Instant) -> Self {
        Self {
            payload: Arc::new(payload),
            is_keyframe,
            timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
