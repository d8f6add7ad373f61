//! Compositing: blend the selected mask onto the source image.
//!
//! Only masked pixels are touched. Each masked pixel becomes
//! `source + opacity * (color - source)` per channel, truncated toward
//! zero; every other pixel is copied from the source unchanged. The source buffer is never modified.

use serde::{Deserialize, Serialize};

use crate::types::{BinaryMask, Dimensions, GrayImage, PipelineError, RgbImage};

/// Overlay color and opacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendParams {
    /// Overlay color as `[r, g, b]`.
    pub color: [u8; 3],
    /// Overlay opacity in `[0.0, 1.0]`.
    pub opacity: f32,
}

impl BlendParams {
    /// Default overlay color (blue).
    pub const DEFAULT_COLOR: [u8; 3] = [0, 0, 255];

    /// Default overlay opacity.
    pub const DEFAULT_OPACITY: f32 = 0.5;

    /// Check that the parameters can be used for blending.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidBlendParameter`] if `opacity` is
    /// NaN or outside `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if (0.0..=1.0).contains(&self.opacity) {
            Ok(())
        } else {
            Err(PipelineError::InvalidBlendParameter(format!(
                "opacity must be within [0, 1], got {}",
                self.opacity
            )))
        }
    }
}

impl Default for BlendParams {
    fn default() -> Self {
        Self {
            color: Self::DEFAULT_COLOR,
            opacity: Self::DEFAULT_OPACITY,
        }
    }
}

/// Blend `mask` onto `source` with `params`, returning a new image.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidBlendParameter`] if the opacity is out
/// of range, and [`PipelineError::MaskDimensionMismatch`] if the mask
/// and the image differ in size.
pub fn composite(
    source: &RgbImage,
    mask: &BinaryMask,
    params: &BlendParams,
) -> Result<RgbImage, PipelineError> {
    params.validate()?;

    let image = Dimensions::of(source);
    if mask.dimensions() != image {
        return Err(PipelineError::MaskDimensionMismatch {
            mask: mask.dimensions(),
            image,
        });
    }

    let mut blended = source.clone();
    for (x, y, pixel) in blended.enumerate_pixels_mut() {
        if mask.get(x, y) {
            for (channel, &color) in pixel.0.iter_mut().zip(&params.color) {
                *channel = blend_channel(*channel, color, params.opacity);
            }
        }
    }

    tracing::debug!(
        masked_pixels = mask.area(),
        opacity = params.opacity,
        "composited mask"
    );
    Ok(blended)
}

/// Render a mask as white-on-black grayscale.
#[must_use]
pub fn mask_to_image(mask: &BinaryMask) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        image::Luma([if mask.get(x, y) { 255 } else { 0 }])
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend_channel(source: u8, color: u8, opacity: f32) -> u8 {
    let value = opacity.mul_add(f32::from(color) - f32::from(source), f32::from(source));
    value.trunc().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A small image where every pixel has a distinct color.
    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([
                u8::try_from(x * 30 % 256).unwrap(),
                u8::try_from(y * 50 % 256).unwrap(),
                u8::try_from((x + y) * 17 % 256).unwrap(),
            ])
        })
    }

    fn checker(width: u32, height: u32) -> BinaryMask {
        BinaryMask::from_fn(width, height, |x, y| (x + y) % 2 == 0)
    }

    #[test]
    fn defaults() {
        let params = BlendParams::default();
        assert_eq!(params.color, [0, 0, 255]);
        assert!((params.opacity - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn unmasked_pixels_are_untouched_for_any_opacity() {
        let source = gradient(6, 5);
        let mask = checker(6, 5);
        for step in 0..=10u8 {
            let params = BlendParams {
                color: [200, 10, 90],
                opacity: f32::from(step) / 10.0,
            };
            let blended = composite(&source, &mask, &params).unwrap();
            for (x, y, pixel) in blended.enumerate_pixels() {
                if !mask.get(x, y) {
                    assert_eq!(pixel, source.get_pixel(x, y), "pixel ({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn full_opacity_paints_color_exactly() {
        let source = gradient(5, 5);
        let mask = checker(5, 5);
        let params = BlendParams {
            color: [12, 34, 56],
            opacity: 1.0,
        };
        let blended = composite(&source, &mask, &params).unwrap();
        for (x, y, pixel) in blended.enumerate_pixels() {
            if mask.get(x, y) {
                assert_eq!(pixel.0, [12, 34, 56]);
            }
        }
    }

    #[test]
    fn zero_opacity_is_identity() {
        let source = gradient(4, 4);
        let blended = composite(
            &source,
            &checker(4, 4),
            &BlendParams {
                color: [255, 255, 255],
                opacity: 0.0,
            },
        )
        .unwrap();
        assert_eq!(blended, source);
    }

    #[test]
    fn half_opacity_truncates() {
        let source = RgbImage::from_pixel(1, 1, image::Rgb([0, 100, 255]));
        let mask = BinaryMask::from_fn(1, 1, |_, _| true);
        let blended = composite(&source, &mask, &BlendParams::default()).unwrap();
        // 0 + 127.5, 100 - 50, 255
        assert_eq!(blended.get_pixel(0, 0).0, [0, 50, 255]);

        let black = RgbImage::new(1, 1);
        let blended = composite(&black, &mask, &BlendParams::default()).unwrap();
        assert_eq!(blended.get_pixel(0, 0).0, [0, 0, 127]);
    }

    #[test]
    fn source_is_not_mutated() {
        let source = gradient(4, 3);
        let snapshot = source.clone();
        let mask = BinaryMask::from_fn(4, 3, |_, _| true);
        let blended = composite(&source, &mask, &BlendParams::default()).unwrap();
        assert_eq!(source, snapshot);
        assert_ne!(blended, source);
    }

    #[test]
    fn opacity_out_of_range_is_rejected() {
        let source = gradient(2, 2);
        let mask = checker(2, 2);
        for opacity in [-0.01, 1.01, f32::NAN, f32::INFINITY] {
            let params = BlendParams {
                opacity,
                ..BlendParams::default()
            };
            assert!(
                matches!(
                    composite(&source, &mask, &params),
                    Err(PipelineError::InvalidBlendParameter(_))
                ),
                "opacity {opacity} should be rejected"
            );
        }
    }

    #[test]
    fn mask_size_must_match() {
        let source = gradient(4, 4);
        let mask = checker(4, 3);
        let err = composite(&source, &mask, &BlendParams::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MaskDimensionMismatch {
                mask: Dimensions {
                    width: 4,
                    height: 3
                },
                image: Dimensions {
                    width: 4,
                    height: 4
                },
            }
        ));
    }

    #[test]
    fn empty_mask_copies_source() {
        let source = gradient(3, 3);
        let blended = composite(&source, &BinaryMask::new(3, 3), &BlendParams::default()).unwrap();
        assert_eq!(blended, source);
    }

    #[test]
    fn mask_renders_white_on_black() {
        let mask = BinaryMask::from_fn(2, 1, |x, _| x == 1);
        let img = mask_to_image(&mask);
        assert_eq!(img.as_raw(), &vec![0, 255]);
    }
}
