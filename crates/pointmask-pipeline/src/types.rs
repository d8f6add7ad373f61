//! Shared types for the pointmask prompt-to-mask pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::composite::BlendParams;
use crate::predictor::PredictionError;
use crate::select::MaskSelectorKind;

/// Re-export `RgbImage` so downstream crates can pass source and
/// composited images around without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `GrayImage` for rendered masks.
pub use image::GrayImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an RGB image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Polarity of an annotation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    /// The point lies on the object of interest.
    Included,
    /// The point lies on background that must stay outside the mask.
    Excluded,
}

impl PointKind {
    /// Parse the wire label (`"included"` or `"excluded"`).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "included" => Some(Self::Included),
            "excluded" => Some(Self::Excluded),
            _ => None,
        }
    }

    /// The wire label for this kind.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Included => "included",
            Self::Excluded => "excluded",
        }
    }

    /// Predictor label: 1 for foreground, 0 for background.
    #[must_use]
    pub const fn predictor_label(self) -> i32 {
        match self {
            Self::Included => 1,
            Self::Excluded => 0,
        }
    }
}

/// One annotation as received from a client, before validation.
///
/// Front ends send `{"x": 12.5, "y": 40, "type": "included"}`; the
/// `kind` spelling is accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    /// Horizontal position in source image pixels.
    pub x: f64,
    /// Vertical position in source image pixels.
    pub y: f64,
    /// Polarity label. Anything other than `included`/`excluded` is
    /// rejected by the prompt builder.
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
}

impl RawPoint {
    /// Convenience constructor.
    #[must_use]
    pub fn new(x: f64, y: f64, kind: impl Into<String>) -> Self {
        Self {
            x,
            y,
            kind: kind.into(),
        }
    }
}

/// One validated user click.
///
/// Coordinates are not checked against the image bounds; they are
/// handed to the predictor as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointPrompt {
    /// Horizontal position in pixels.
    pub x: i32,
    /// Vertical position in pixels.
    pub y: i32,
    /// `true` for foreground points, `false` for background points.
    pub included: bool,
}

/// Included and excluded points of one request, each in annotation order.
///
/// Serializes as `{"included": [[x, y], ...], "excluded": [[x, y], ...]}`,
/// which is also the shape persisted as a mask's coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSet {
    /// Foreground points.
    pub included: Vec<(i32, i32)>,
    /// Background points.
    pub excluded: Vec<(i32, i32)>,
}

impl PromptSet {
    /// Total number of points across both lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.included.len() + self.excluded.len()
    }

    /// Returns `true` if neither list has any point.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }

    /// Flatten back into point prompts, included points first.
    #[must_use]
    pub fn to_point_prompts(&self) -> Vec<PointPrompt> {
        let included = self.included.iter().map(|&(x, y)| PointPrompt {
            x,
            y,
            included: true,
        });
        let excluded = self.excluded.iter().map(|&(x, y)| PointPrompt {
            x,
            y,
            included: false,
        });
        included.chain(excluded).collect()
    }
}

/// A binary region mask, row-major, one flag per pixel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMask")]
pub struct BinaryMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

/// Unchecked wire form of [`BinaryMask`].
#[derive(Deserialize)]
struct RawMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl TryFrom<RawMask> for BinaryMask {
    type Error = String;

    fn try_from(raw: RawMask) -> Result<Self, Self::Error> {
        let len = raw.bits.len();
        Self::from_raw(raw.width, raw.height, raw.bits).ok_or_else(|| {
            format!(
                "mask has {len} flags, expected {} for {}x{}",
                raw.width as usize * raw.height as usize,
                raw.width,
                raw.height
            )
        })
    }
}

impl BinaryMask {
    /// An all-clear mask.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    /// Wrap row-major flags. Returns `None` if the length does not match.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, bits: Vec<bool>) -> Option<Self> {
        (bits.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            bits,
        })
    }

    /// Treat every non-zero pixel of a grayscale image as masked.
    #[must_use]
    pub fn from_luma(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            bits: image.as_raw().iter().map(|&v| v != 0).collect(),
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Width and height together.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// Whether pixel `(x, y)` is masked. Out-of-range pixels are not.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.index(x, y).is_some_and(|i| self.bits[i])
    }

    /// Set pixel `(x, y)`. Out-of-range writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if let Some(i) = self.index(x, y) {
            self.bits[i] = value;
        }
    }

    /// Number of masked pixels.
    #[must_use]
    pub fn area(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Row-major flags.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| y as usize * self.width as usize + x as usize)
    }
}

/// One mask proposed by the predictor for a prompt set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMask {
    /// Pixel mask with the source image's dimensions.
    pub mask: BinaryMask,
    /// Predictor confidence for this candidate.
    pub score: f32,
    /// Predicted IoU, when the predictor reports one separately.
    pub iou_prediction: Option<f32>,
}

/// The candidate chosen by the selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedMask {
    candidate: CandidateMask,
    index: usize,
}

impl SelectedMask {
    pub(crate) const fn new(candidate: CandidateMask, index: usize) -> Self {
        Self { candidate, index }
    }

    /// The chosen mask.
    #[must_use]
    pub const fn mask(&self) -> &BinaryMask {
        &self.candidate.mask
    }

    /// The chosen candidate's score (persisted as the mask confidence).
    #[must_use]
    pub const fn score(&self) -> f32 {
        self.candidate.score
    }

    /// The chosen candidate's predicted IoU, if any.
    #[must_use]
    pub const fn iou_prediction(&self) -> Option<f32> {
        self.candidate.iou_prediction
    }

    /// Position of the chosen candidate in the predictor's output.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The full chosen candidate.
    #[must_use]
    pub const fn candidate(&self) -> &CandidateMask {
        &self.candidate
    }
}

/// Output of one pipeline run.
///
/// Does not derive `Serialize`: images are encoded by `pointmask-export`.
#[derive(Debug, Clone)]
pub struct CompositeResult {
    /// Source image with the selected mask blended in.
    pub blended: RgbImage,
    /// The decoded source image, unchanged.
    pub source: RgbImage,
    /// The mask that was composited.
    pub selected: SelectedMask,
    /// The prompt that produced it.
    pub prompts: PromptSet,
}

impl CompositeResult {
    /// Dimensions shared by the source and blended images.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.source)
    }
}

/// Configuration for the prompt-to-mask pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Overlay color and opacity used by the compositor.
    pub blend: BlendParams,

    /// Which candidate the selector picks.
    pub selector: MaskSelectorKind,

    /// Ask the predictor for several candidates instead of one.
    pub multi_output: bool,
}

impl PipelineConfig {
    /// Default for [`multi_output`](Self::multi_output).
    pub const DEFAULT_MULTI_OUTPUT: bool = true;
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            blend: BlendParams::default(),
            selector: MaskSelectorKind::default(),
            multi_output: Self::DEFAULT_MULTI_OUTPUT,
        }
    }
}

/// Errors that can occur during pipeline processing.
///
/// Every stage fails fast with one of these and the orchestrator passes
/// it on unchanged. Mapping to user-facing statuses is left to the caller,
/// see [`code`](Self::code).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// An annotation point could not be turned into a prompt.
    #[error("invalid prompt point at index {index}: {reason}")]
    InvalidPrompt {
        /// Position of the offending point in the raw list.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The prompt has no included point.
    #[error("prompt has no included points")]
    EmptyPrompt,

    /// The predictor failed.
    #[error("prediction failed: {0}")]
    Prediction(#[from] PredictionError),

    /// The predictor returned no candidates, or the selection policy
    /// did not pick one.
    #[error("no mask was produced for the prompt")]
    NoMaskProduced,

    /// Compositing parameters are out of range.
    #[error("invalid blend parameter: {0}")]
    InvalidBlendParameter(String),

    /// The mask does not cover the image it is composited onto.
    #[error("mask is {mask} but image is {image}")]
    MaskDimensionMismatch {
        /// Dimensions of the mask.
        mask: Dimensions,
        /// Dimensions of the source image.
        image: Dimensions,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Stable identifier of the error kind, for transport-level mapping.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ImageDecode(_) => "image_decode",
            Self::EmptyInput => "empty_input",
            Self::InvalidPrompt { .. } => "invalid_prompt",
            Self::EmptyPrompt => "empty_prompt",
            Self::Prediction(e) => e.kind().code(),
            Self::NoMaskProduced => "no_mask_produced",
            Self::InvalidBlendParameter(_) => "invalid_blend_parameter",
            Self::MaskDimensionMismatch { .. } => "mask_dimension_mismatch",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::predictor::PredictionErrorKind;

    // --- PointKind ---

    #[test]
    fn point_kind_labels_round_trip() {
        for kind in [PointKind::Included, PointKind::Excluded] {
            assert_eq!(PointKind::from_label(kind.label()), Some(kind));
        }
    }

    #[test]
    fn point_kind_rejects_other_labels() {
        assert_eq!(PointKind::from_label("Included"), None);
        assert_eq!(PointKind::from_label(""), None);
        assert_eq!(PointKind::from_label("maybe"), None);
    }

    #[test]
    fn predictor_labels() {
        assert_eq!(PointKind::Included.predictor_label(), 1);
        assert_eq!(PointKind::Excluded.predictor_label(), 0);
    }

    // --- RawPoint ---

    #[test]
    fn raw_point_reads_type_field() {
        let p: RawPoint = serde_json::from_str(r#"{"x": 3.7, "y": 4, "type": "excluded"}"#).unwrap();
        assert_eq!(p, RawPoint::new(3.7, 4.0, "excluded"));
    }

    #[test]
    fn raw_point_accepts_kind_alias() {
        let p: RawPoint = serde_json::from_str(r#"{"x": 1, "y": 2, "kind": "included"}"#).unwrap();
        assert_eq!(p.kind, "included");
    }

    // --- PromptSet ---

    #[test]
    fn prompt_set_serializes_as_coordinate_lists() {
        let set = PromptSet {
            included: vec![(1, 2)],
            excluded: vec![(3, 4), (5, 6)],
        };
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"included": [[1, 2]], "excluded": [[3, 4], [5, 6]]})
        );
        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
    }

    #[test]
    fn prompt_set_flattens_included_first() {
        let set = PromptSet {
            included: vec![(1, 1)],
            excluded: vec![(9, 9)],
        };
        let prompts = set.to_point_prompts();
        assert_eq!(
            prompts,
            vec![
                PointPrompt {
                    x: 1,
                    y: 1,
                    included: true
                },
                PointPrompt {
                    x: 9,
                    y: 9,
                    included: false
                },
            ]
        );
    }

    // --- BinaryMask ---

    #[test]
    fn mask_from_fn_is_row_major() {
        let mask = BinaryMask::from_fn(3, 2, |x, y| x == 2 && y == 1);
        assert_eq!(mask.as_slice(), &[false, false, false, false, false, true]);
        assert!(mask.get(2, 1));
        assert_eq!(mask.area(), 1);
    }

    #[test]
    fn mask_out_of_range_is_unset_and_ignored() {
        let mut mask = BinaryMask::new(2, 2);
        mask.set(5, 5, true);
        assert!(!mask.get(5, 5));
        assert_eq!(mask.area(), 0);
    }

    #[test]
    fn mask_from_raw_checks_length() {
        assert!(BinaryMask::from_raw(2, 2, vec![true; 3]).is_none());
        assert!(BinaryMask::from_raw(2, 2, vec![true; 4]).is_some());
    }

    #[test]
    fn mask_deserialization_checks_length() {
        let short = r#"{"width": 2, "height": 2, "bits": [true]}"#;
        assert!(serde_json::from_str::<BinaryMask>(short).is_err());

        let mask: BinaryMask =
            serde_json::from_str(r#"{"width": 2, "height": 1, "bits": [false, true]}"#).unwrap();
        assert!(mask.get(1, 0));
        let back: BinaryMask = serde_json::from_value(serde_json::to_value(&mask).unwrap()).unwrap();
        assert_eq!(back, mask);
    }

    #[test]
    fn mask_from_luma_uses_non_zero() {
        let img = GrayImage::from_raw(2, 1, vec![0, 7]).unwrap();
        let mask = BinaryMask::from_luma(&img);
        assert!(!mask.get(0, 0));
        assert!(mask.get(1, 0));
        assert_eq!(mask.dimensions(), Dimensions { width: 2, height: 1 });
    }

    // --- PipelineConfig ---

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: PipelineConfig = serde_json::from_str(r#"{"selector": "highest_score"}"#).unwrap();
        assert_eq!(config.selector, MaskSelectorKind::HighestScore);
        assert_eq!(config.blend, BlendParams::default());
        assert!(config.multi_output);
    }

    // --- PipelineError ---

    #[test]
    fn error_codes_follow_prediction_kind() {
        let err = PipelineError::from(PredictionError::new(
            PredictionErrorKind::ResourceExhausted,
            "out of memory",
        ));
        assert_eq!(err.code(), "prediction_resource_exhausted");
        assert_eq!(PipelineError::EmptyPrompt.code(), "empty_prompt");
    }

    #[test]
    fn dimension_mismatch_message() {
        let err = PipelineError::MaskDimensionMismatch {
            mask: Dimensions { width: 2, height: 3 },
            image: Dimensions { width: 4, height: 4 },
        };
        assert_eq!(err.to_string(), "mask is 2x3 but image is 4x4");
    }
}
