//! Image decoding, detection overlay and PNG packaging

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dustwatch_core::{Detection, DustwatchError, DustwatchResult};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Fill colour for detected regions
pub const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Opacity of the fill
pub const OVERLAY_ALPHA: f32 = 0.4;

/// Decode an uploaded image into RGB
pub fn decode_upload(bytes: &[u8], max_size: usize) -> DustwatchResult<RgbImage> {
    if bytes.is_empty() {
        return Err(DustwatchError::InvalidImage("Image data is empty".to_string()));
    }
    if bytes.len() > max_size {
        return Err(DustwatchError::InvalidImage(format!(
            "Image data is too large: {} bytes (max: {} bytes)",
            bytes.len(),
            max_size
        )));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|e| DustwatchError::InvalidImage(format!("Failed to decode image: {}", e)))?;
    Ok(image.to_rgb8())
}

/// Encode an RGB image as PNG
pub fn encode_png(image: &RgbImage) -> DustwatchResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| DustwatchError::Internal(format!("Failed to encode PNG: {}", e)))?;
    Ok(buf.into_inner())
}

/// Encode an RGB image as base64 PNG
pub fn to_base64_png(image: &RgbImage) -> DustwatchResult<String> {
    Ok(STANDARD.encode(encode_png(image)?))
}

/// Blend a filled rectangle over every detection.
///
/// Box corners are inclusive and clipped to the image. Overlapping boxes are
/// blended once per box.
pub fn draw_overlay(image: &mut RgbImage, detections: &[Detection], color: Rgb<u8>, alpha: f32) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    let alpha = alpha.clamp(0.0, 1.0);

    for det in detections {
        let b = det.bbox;
        if b.x2 < 0 || b.y2 < 0 || b.x1 > max_x || b.y1 > max_y {
            continue;
        }
        let (x1, x2) = (b.x1.clamp(0, max_x) as u32, b.x2.clamp(0, max_x) as u32);
        let (y1, y2) = (b.y1.clamp(0, max_y) as u32, b.y2.clamp(0, max_y) as u32);

        for y in y1..=y2 {
            for x in x1..=x2 {
                let pixel = image.get_pixel_mut(x, y);
                for (channel, &fill) in pixel.0.iter_mut().zip(color.0.iter()) {
                    let blended = alpha * f32::from(fill) + (1.0 - alpha) * f32::from(*channel);
                    *channel = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}
