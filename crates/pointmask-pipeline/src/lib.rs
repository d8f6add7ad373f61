//! pointmask-pipeline: point prompts to a composited mask (sans-IO).
//!
//! Turns user clicks on an image into a segmentation mask and a blended
//! preview through:
//! prompt building -> decoding -> prediction -> selection -> compositing.
//!
//! The segmentation model sits behind the [`Predictor`] trait; this crate
//! never loads weights or touches the filesystem. Backends live in
//! `pointmask-onnx` (a SAM 2 ONNX export) and in the CLI's replay
//! predictor.

pub mod composite;
pub mod decode;
pub mod device;
pub mod diagnostics;
pub mod pipeline;
pub mod predictor;
pub mod prompt;
pub mod select;
pub mod types;

pub use composite::BlendParams;
pub use device::{DeviceConfig, DeviceKind, DeviceProbe, Precision, ResolvedDevice};
pub use diagnostics::{Clock, PipelineDiagnostics};
pub use pipeline::Pipeline;
pub use predictor::{
    PredictionError, PredictionErrorKind, Predictor, PredictorAdapter, PredictorOutput,
};
pub use select::{MaskSelector, MaskSelectorKind};
pub use types::{
    BinaryMask, CandidateMask, CompositeResult, Dimensions, PipelineConfig, PipelineError,
    PointKind, PointPrompt, PromptSet, RawPoint, SelectedMask,
};
