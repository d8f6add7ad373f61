//! Errors from the ONNX backend and their mapping onto predictor errors.

use pointmask_pipeline::{PredictionError, PredictionErrorKind};

/// Errors raised while loading or running the SAM 2 graph.
#[derive(Debug, thiserror::Error)]
pub enum OnnxError {
    /// ONNX Runtime reported a failure.
    #[error("onnx runtime: {0}")]
    Runtime(#[from] ort::Error),

    /// A prompt or image tensor could not be shaped.
    #[error("input tensor shape: {0}")]
    Input(#[from] ndarray::ShapeError),

    /// `predict` was called before `set_image`.
    #[error("no image has been set")]
    NoImage,

    /// Coordinates and labels differ in length.
    #[error("{coords} point coordinates but {labels} labels")]
    PromptLength {
        /// Number of coordinate pairs.
        coords: usize,
        /// Number of labels.
        labels: usize,
    },

    /// The graph has no output with this name.
    #[error("model output {0:?} is missing")]
    MissingOutput(&'static str),

    /// An output tensor has an unexpected shape.
    #[error("unexpected output shape: {0}")]
    Output(String),

    /// The requested device cannot be configured.
    #[error("device setup: {0}")]
    Device(String),
}

impl OnnxError {
    /// The predictor error category this failure belongs to.
    #[must_use]
    pub fn kind(&self) -> PredictionErrorKind {
        match self {
            Self::Runtime(e) if is_allocation_failure(&e.to_string()) => {
                PredictionErrorKind::ResourceExhausted
            }
            Self::Runtime(_) | Self::Device(_) => PredictionErrorKind::Backend,
            Self::Input(_) | Self::NoImage | Self::PromptLength { .. } => {
                PredictionErrorKind::MalformedInput
            }
            Self::MissingOutput(_) | Self::Output(_) => PredictionErrorKind::InvalidOutput,
        }
    }
}

impl From<OnnxError> for PredictionError {
    fn from(err: OnnxError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

fn is_allocation_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["out of memory", "failed to allocate", "bad_alloc"]
        .iter()
        .any(|needle| message.contains(needle))
}
