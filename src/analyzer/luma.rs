use crate::error::AnalyzerError;
use crate::frame::{FrameData, FrameFormat};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};

/// Extract the single-channel intensity image from a frame
pub fn frame_to_luma(frame: &FrameData) -> Result<GrayImage, AnalyzerError> {
    if !frame.validate_size() {
        return Err(AnalyzerError::FrameProcessing {
            details: format!(
                "frame {} has {} bytes, expected {:?} for {}x{} {:?}",
                frame.id,
                frame.data.len(),
                frame.expected_size(),
                frame.width,
                frame.height,
                frame.format
            ),
        });
    }

    match frame.format {
        FrameFormat::Mjpeg => {
            let decoded = image::load_from_memory(&frame.data).map_err(|e| {
                AnalyzerError::FrameProcessing {
                    details: format!("MJPEG decode failed: {}", e),
                }
            })?;
            Ok(decoded.to_luma8())
        }
        FrameFormat::Gray8 => gray_from_raw(frame.width, frame.height, frame.data.to_vec()),
        // Planar: the luma plane comes first
        FrameFormat::Yuv420 => {
            let plane = (frame.width * frame.height) as usize;
            gray_from_raw(frame.width, frame.height, frame.data[..plane].to_vec())
        }
        // Packed Y0 U Y1 V: every even byte is luma
        FrameFormat::Yuyv => {
            let luma = frame.data.iter().step_by(2).copied().collect();
            gray_from_raw(frame.width, frame.height, luma)
        }
        FrameFormat::Rgb24 => rgb24_to_gray(frame),
    }
}

fn gray_from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<GrayImage, AnalyzerError> {
    GrayImage::from_raw(width, height, data).ok_or_else(|| AnalyzerError::FrameProcessing {
        details: "Failed to create grayscale image from raw data".to_string(),
    })
}

fn rgb24_to_gray(frame: &FrameData) -> Result<GrayImage, AnalyzerError> {
    let rgb_image = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
        .ok_or_else(|| AnalyzerError::FrameProcessing {
            details: "Failed to create RGB image from raw data".to_string(),
        })?;

    let mut gray_image = GrayImage::new(frame.width, frame.height);
    for (x, y, rgb) in rgb_image.enumerate_pixels() {
        let gray_value =
            (0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32).round() as u8;
        gray_image.put_pixel(x, y, Luma([gray_value]));
    }

    Ok(gray_image)
}

/// Scale to the motion-detection resolution; a no-op when already there
pub fn downscale(image: GrayImage, (width, height): (u32, u32)) -> GrayImage {
    if image.dimensions() == (width, height) {
        image
    } else {
        imageops::resize(&image, width, height, FilterType::Triangle)
    }
}
