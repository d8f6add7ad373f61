//! Predictors the CLI can drive: a real model, or recorded masks.

use std::path::Path;

use pointmask_onnx::OnnxSam2Predictor;
use pointmask_pipeline::types::RgbImage;
use pointmask_pipeline::{
    BinaryMask, Dimensions, PredictionError, Predictor, PredictorOutput,
};

/// Replays pre-computed candidate masks instead of running a model.
///
/// Candidates come back in the order they were given, whatever the
/// prompt. Lets the pipeline run without model weights.
#[derive(Debug)]
pub struct ReplayPredictor {
    masks: Vec<BinaryMask>,
    scores: Vec<f32>,
    image: Option<Dimensions>,
}

impl ReplayPredictor {
    /// Score given to every candidate when none are supplied.
    pub const DEFAULT_SCORE: f32 = 1.0;

    /// Replay `masks` with `scores`. An empty `scores` gives every mask
    /// [`DEFAULT_SCORE`](Self::DEFAULT_SCORE).
    ///
    /// # Errors
    ///
    /// Returns a message if `scores` is non-empty and its length differs
    /// from the number of masks.
    pub fn new(masks: Vec<BinaryMask>, scores: Vec<f32>) -> Result<Self, String> {
        let scores = if scores.is_empty() {
            vec![Self::DEFAULT_SCORE; masks.len()]
        } else if scores.len() == masks.len() {
            scores
        } else {
            return Err(format!(
                "{} candidate masks but {} candidate scores",
                masks.len(),
                scores.len()
            ));
        };
        Ok(Self {
            masks,
            scores,
            image: None,
        })
    }

    /// Load candidate masks from image files; any non-zero luma is masked.
    ///
    /// # Errors
    ///
    /// Returns a message naming the file that could not be read.
    pub fn load<P: AsRef<Path>>(paths: &[P], scores: Vec<f32>) -> Result<Self, String> {
        let masks = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                image::open(path)
                    .map(|img| BinaryMask::from_luma(&img.to_luma8()))
                    .map_err(|e| format!("Error reading candidate {}: {e}", path.display()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(masks, scores)
    }
}

impl Predictor for ReplayPredictor {
    fn set_image(&mut self, image: &RgbImage) -> Result<(), PredictionError> {
        self.image = Some(Dimensions::of(image));
        Ok(())
    }

    fn predict(
        &mut self,
        _point_coords: &[[i32; 2]],
        _point_labels: &[i32],
        multi_output: bool,
    ) -> Result<PredictorOutput, PredictionError> {
        let image = self
            .image
            .ok_or_else(|| PredictionError::malformed_input("no image has been set"))?;
        if let Some(mask) = self.masks.iter().find(|m| m.dimensions() != image) {
            return Err(PredictionError::malformed_input(format!(
                "candidate mask is {} but image is {image}",
                mask.dimensions()
            )));
        }

        let count = if multi_output {
            self.masks.len()
        } else {
            self.masks.len().min(1)
        };
        Ok(PredictorOutput {
            masks: self.masks[..count].to_vec(),
            scores: self.scores[..count].to_vec(),
            iou_predictions: None,
            logits: Vec::new(),
        })
    }
}

/// The predictor selected on the command line.
#[derive(Debug)]
pub enum Backend {
    /// SAM 2 through ONNX Runtime.
    Onnx(Box<OnnxSam2Predictor>),
    /// Recorded candidate masks.
    Replay(ReplayPredictor),
}

impl Predictor for Backend {
    fn set_image(&mut self, image: &RgbImage) -> Result<(), PredictionError> {
        match self {
            Self::Onnx(p) => p.set_image(image),
            Self::Replay(p) => p.set_image(image),
        }
    }

    fn predict(
        &mut self,
        point_coords: &[[i32; 2]],
        point_labels: &[i32],
        multi_output: bool,
    ) -> Result<PredictorOutput, PredictionError> {
        match self {
            Self::Onnx(p) => p.predict(point_coords, point_labels, multi_output),
            Self::Replay(p) => p.predict(point_coords, point_labels, multi_output),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pointmask_pipeline::PredictionErrorKind;

    use super::*;

    fn masks() -> Vec<BinaryMask> {
        vec![
            BinaryMask::from_fn(2, 2, |x, _| x == 0),
            BinaryMask::from_fn(2, 2, |_, y| y == 0),
        ]
    }

    #[test]
    fn default_scores_fill_in() {
        let mut replay = ReplayPredictor::new(masks(), Vec::new()).unwrap();
        replay.set_image(&RgbImage::new(2, 2)).unwrap();
        let out = replay.predict(&[[0, 0]], &[1], true).unwrap();
        assert_eq!(out.masks, masks());
        assert_eq!(out.scores, vec![1.0, 1.0]);
    }

    #[test]
    fn score_count_must_match() {
        assert!(ReplayPredictor::new(masks(), vec![0.5]).is_err());
    }

    #[test]
    fn single_output_keeps_first() {
        let mut replay = ReplayPredictor::new(masks(), vec![0.2, 0.8]).unwrap();
        replay.set_image(&RgbImage::new(2, 2)).unwrap();
        let out = replay.predict(&[[0, 0]], &[1], false).unwrap();
        assert_eq!(out.masks.len(), 1);
        assert_eq!(out.scores, vec![0.2]);
    }

    #[test]
    fn size_mismatch_is_malformed_input() {
        let mut replay = ReplayPredictor::new(masks(), Vec::new()).unwrap();
        replay.set_image(&RgbImage::new(3, 2)).unwrap();
        let err = replay.predict(&[[0, 0]], &[1], true).unwrap_err();
        assert_eq!(err.kind(), PredictionErrorKind::MalformedInput);
    }

    #[test]
    fn predict_before_set_image_fails() {
        let mut replay = ReplayPredictor::new(masks(), Vec::new()).unwrap();
        let err = replay.predict(&[[0, 0]], &[1], true).unwrap_err();
        assert_eq!(err.kind(), PredictionErrorKind::MalformedInput);
    }
}
