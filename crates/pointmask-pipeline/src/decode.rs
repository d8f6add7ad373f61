//! Image decoding to a 3-channel RGB buffer.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP). Alpha is dropped and
//! grayscale or palette images are expanded, so the predictor always
//! sees `H x W x 3`.

use crate::types::{PipelineError, RgbImage};

/// Decode raw image bytes into an RGB image.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}
