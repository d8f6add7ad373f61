//! Conversions between images, prompts and the SAM 2 graph's tensors.
//!
//! The exported graph works in a fixed square model space: the image is
//! stretched to [`MODEL_SIZE`] on both axes, point coordinates are scaled
//! to match, and masks come back at model resolution as logits.

use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayView2};
use pointmask_pipeline::{BinaryMask, Dimensions};
use pointmask_pipeline::types::RgbImage;

use crate::error::OnnxError;

/// Side length of the model's square input, in pixels.
pub const MODEL_SIZE: u32 = 1024;

/// Per-channel mean used to normalize RGB input.
pub const PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation used to normalize RGB input.
pub const PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize `image` to model space and lay it out as a normalized
/// `[1, 3, MODEL_SIZE, MODEL_SIZE]` tensor.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn image_tensor(image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(image, MODEL_SIZE, MODEL_SIZE, FilterType::Lanczos3);
    let side = MODEL_SIZE as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        let value = f32::from(resized.get_pixel(x as u32, y as u32).0[c]) / 255.0;
        (value - PIXEL_MEAN[c]) / PIXEL_STD[c]
    })
}

/// Scale a pixel coordinate of an image with `source` dimensions into
/// model space.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn scale_point(point: [i32; 2], source: Dimensions) -> [f32; 2] {
    let model = MODEL_SIZE as f32;
    [
        point[0] as f32 * model / source.width as f32,
        point[1] as f32 * model / source.height as f32,
    ]
}

/// Threshold a model-resolution logit map at zero and resize it to
/// `target` with nearest-neighbor sampling.
///
/// # Errors
///
/// Returns [`OnnxError::Output`] if the logit map is empty.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn mask_from_logits(
    logits: ArrayView2<'_, f32>,
    target: Dimensions,
) -> Result<BinaryMask, OnnxError> {
    let (rows, cols) = logits.dim();
    if rows == 0 || cols == 0 {
        return Err(OnnxError::Output(format!("mask logits are {cols}x{rows}")));
    }

    let x_scale = cols as f64 / f64::from(target.width);
    let y_scale = rows as f64 / f64::from(target.height);
    Ok(BinaryMask::from_fn(target.width, target.height, |x, y| {
        let sx = ((f64::from(x) + 0.5) * x_scale) as usize;
        let sy = ((f64::from(y) + 0.5) * y_scale) as usize;
        logits[[sy.min(rows - 1), sx.min(cols - 1)]] > 0.0
    }))
}
