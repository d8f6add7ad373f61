//! pointmask-onnx: SAM 2 predictor backend on ONNX Runtime.
//!
//! [`OnnxSam2Predictor`] implements the pipeline's `Predictor` trait for
//! a SAM 2 export with a combined encoder and decoder. [`OrtProbe`]
//! answers device questions from the execution providers compiled into
//! ONNX Runtime.

pub mod error;
pub mod probe;
pub mod session;
pub mod tensor;

pub use error::OnnxError;
pub use probe::OrtProbe;
pub use session::OnnxSam2Predictor;
