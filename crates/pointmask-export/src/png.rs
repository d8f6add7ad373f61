//! PNG encoding for composited previews and masks.
//!
//! Pure functions: images go in, encoded bytes come out.

use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use pointmask_pipeline::composite::mask_to_image;
use pointmask_pipeline::types::{BinaryMask, GrayImage, RgbImage};

/// Errors from the export serializers.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The PNG encoder rejected the image.
    #[error("failed to encode PNG: {0}")]
    Png(#[from] image::ImageError),
}

/// Encode an RGB image as PNG.
///
/// # Errors
///
/// Returns [`ExportError::Png`] if encoding fails.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Encode a mask as an 8-bit grayscale PNG, white where masked.
///
/// # Errors
///
/// Returns [`ExportError::Png`] if encoding fails.
pub fn encode_mask_png(mask: &BinaryMask) -> Result<Vec<u8>, ExportError> {
    encode_gray(&mask_to_image(mask))
}

fn encode_gray(image: &GrayImage) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::L8,
    )?;
    Ok(buf)
}
