//! [`Predictor`] implementation over an ONNX Runtime session.

use std::path::Path;

use ndarray::{Array2, Array3, Array4, Ix4, s};
use ort::execution_providers::{CUDAExecutionProvider, CoreMLExecutionProvider};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use pointmask_pipeline::device::ResolvedDeviceKind;
use pointmask_pipeline::types::RgbImage;
use pointmask_pipeline::{
    Dimensions, PredictionError, Precision, Predictor, PredictorOutput, ResolvedDevice,
};

use crate::error::OnnxError;
use crate::tensor::{image_tensor, mask_from_logits, scale_point};

/// Image tensor waiting for prompts.
struct PreparedImage {
    tensor: Array4<f32>,
    dimensions: Dimensions,
}

/// A SAM 2 model exported to a single ONNX graph.
///
/// Inputs: `image [1, 3, 1024, 1024]`, `point_coords [1, N, 2]`,
/// `point_labels [1, N]`. Outputs: `masks [1, K, 1024, 1024]` (logits)
/// and `iou_predictions [1, K]`. The encoder runs inside the graph, so
/// `set_image` only prepares the tensor; the embedding is computed on
/// each predict call.
pub struct OnnxSam2Predictor {
    session: Session,
    current: Option<PreparedImage>,
}

impl std::fmt::Debug for OnnxSam2Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSam2Predictor")
            .field("image_set", &self.current.as_ref().map(|p| p.dimensions))
            .finish_non_exhaustive()
    }
}

impl OnnxSam2Predictor {
    /// Load the model at `path` for `device`.
    ///
    /// bfloat16 and TF32 are properties of the exported graph here; a
    /// resolved request for them is logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns [`OnnxError::Runtime`] if the session cannot be built and
    /// [`OnnxError::Device`] if the CUDA ordinal is out of range.
    pub fn load(path: impl AsRef<Path>, device: &ResolvedDevice) -> Result<Self, OnnxError> {
        let path = path.as_ref();
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(device.intra_threads)?;

        let builder = match device.kind {
            ResolvedDeviceKind::Cpu => builder,
            ResolvedDeviceKind::Cuda { ordinal } => {
                let id = i32::try_from(ordinal)
                    .map_err(|_| OnnxError::Device(format!("CUDA ordinal {ordinal} is too large")))?;
                builder.with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(id)
                    .build()])?
            }
            ResolvedDeviceKind::Mps => {
                builder.with_execution_providers([CoreMLExecutionProvider::default().build()])?
            }
        };

        if device.precision == Precision::BFloat16 || device.tf32 {
            tracing::debug!(
                precision = ?device.precision,
                tf32 = device.tf32,
                "precision is fixed by the exported graph"
            );
        }

        let session = builder.commit_from_file(path)?;
        tracing::info!(path = %path.display(), device = ?device.kind, "loaded SAM 2 model");
        Ok(Self {
            session,
            current: None,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn run(
        &mut self,
        point_coords: &[[i32; 2]],
        point_labels: &[i32],
        multi_output: bool,
    ) -> Result<PredictorOutput, OnnxError> {
        let prepared = self.current.as_ref().ok_or(OnnxError::NoImage)?;
        if point_coords.len() != point_labels.len() {
            return Err(OnnxError::PromptLength {
                coords: point_coords.len(),
                labels: point_labels.len(),
            });
        }

        let n = point_coords.len();
        let coords: Vec<f32> = point_coords
            .iter()
            .flat_map(|&p| scale_point(p, prepared.dimensions))
            .collect();
        let labels: Vec<f32> = point_labels.iter().map(|&l| l as f32).collect();

        let t_image = Tensor::from_array(prepared.tensor.clone())?;
        let t_coords = Tensor::from_array(Array3::from_shape_vec((1, n, 2), coords)?)?;
        let t_labels = Tensor::from_array(Array2::from_shape_vec((1, n), labels)?)?;
        let dimensions = prepared.dimensions;

        let outputs = self.session.run(ort::inputs![
            "image" => t_image,
            "point_coords" => t_coords,
            "point_labels" => t_labels,
        ])?;

        let mut scores: Vec<f32> = outputs
            .get("iou_predictions")
            .ok_or(OnnxError::MissingOutput("iou_predictions"))?
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();
        let masks = outputs
            .get("masks")
            .ok_or(OnnxError::MissingOutput("masks"))?
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()
            .map_err(|e| OnnxError::Output(format!("masks: {e}")))?;

        let available = masks.shape()[1];
        let count = if multi_output {
            available
        } else {
            available.min(1)
        };
        scores.truncate(count);

        let mut out_masks = Vec::with_capacity(count);
        let mut out_logits = Vec::with_capacity(count);
        for k in 0..count {
            let logits = masks.slice(s![0, k, .., ..]);
            out_masks.push(mask_from_logits(logits, dimensions)?);
            out_logits.push(logits.iter().copied().collect());
        }

        tracing::debug!(candidates = count, "SAM 2 inference finished");
        Ok(PredictorOutput {
            masks: out_masks,
            iou_predictions: Some(scores.clone()),
            scores,
            logits: out_logits,
        })
    }
}

impl Predictor for OnnxSam2Predictor {
    fn set_image(&mut self, image: &RgbImage) -> Result<(), PredictionError> {
        let dimensions = Dimensions::of(image);
        if dimensions.pixel_count() == 0 {
            return Err(PredictionError::malformed_input(format!(
                "image is empty ({dimensions})"
            )));
        }
        self.current = Some(PreparedImage {
            tensor: image_tensor(image),
            dimensions,
        });
        Ok(())
    }

    fn predict(
        &mut self,
        point_coords: &[[i32; 2]],
        point_labels: &[i32],
        multi_output: bool,
    ) -> Result<PredictorOutput, PredictionError> {
        self.run(point_coords, point_labels, multi_output)
            .map_err(PredictionError::from)
    }
}
