//! Frame format conversions between the pipeline and detectors

use crate::error::VisionError;
use crate::models::{ChannelOrder, DetectorInput, InputLayout};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Convert an RGB frame into a `[1, 3, H, W]` tensor normalized to [0, 1]
pub fn frame_to_tensor(
    frame: &RgbImage,
    layout: &InputLayout,
) -> Result<DetectorInput, VisionError> {
    let source_size = frame.dimensions();
    if source_size.0 == 0 || source_size.1 == 0 {
        return Err(VisionError::Processing("Invalid image dimensions".to_string()));
    }

    let resized;
    let image = match layout.size {
        Some((w, h)) if w == 0 || h == 0 => {
            return Err(VisionError::Processing(
                "Target dimensions cannot be zero".to_string(),
            ));
        }
        Some((w, h)) if (w, h) != source_size => {
            resized = imageops::resize(frame, w, h, FilterType::Triangle);
            &resized
        }
        _ => frame,
    };

    let (width, height) = image.dimensions();
    let channel_map: [usize; 3] = match layout.channel_order {
        ChannelOrder::Rgb => [0, 1, 2],
        ChannelOrder::Bgr => [2, 1, 0],
    };

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for (plane, &channel) in channel_map.iter().enumerate() {
            tensor[[0, plane, y as usize, x as usize]] = pixel.0[channel] as f32 / 255.0;
        }
    }

    Ok(DetectorInput {
        tensor,
        source_size,
    })
}

/// Build an RGB frame from packed BGR bytes
pub fn rgb_from_bgr(width: u32, height: u32, mut data: Vec<u8>) -> Result<RgbImage, VisionError> {
    let expected = width as usize * height as usize * 3;
    if data.len() != expected {
        return Err(VisionError::Processing(format!(
            "Expected {} bytes of BGR data, got {}",
            expected,
            data.len()
        )));
    }
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| VisionError::Processing("Invalid frame buffer".to_string()))
}

/// Packed BGR bytes of an RGB frame
pub fn bgr_bytes(frame: &RgbImage) -> Vec<u8> {
    let mut data = frame.as_raw().clone();
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    data
}
