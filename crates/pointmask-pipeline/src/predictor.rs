//! Predictor adapter: the boundary to the promptable segmentation model.
//!
//! The model is reached through the [`Predictor`] trait, which mirrors
//! its published two-call interface: an image is *set* (and embedded),
//! then point prompts are run against it. Because the set image is
//! mutable session state, a predictor instance must never see two
//! requests interleave. [`PredictorAdapter`] owns a pool of instances,
//! each behind a mutex, and holds one lock across the whole
//! set-image/predict pair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use crate::device::ResolvedDevice;
use crate::types::{
    BinaryMask, CandidateMask, Dimensions, PipelineError, PointKind, PromptSet, RgbImage,
};

/// Category of a predictor failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionErrorKind {
    /// The image or prompt had the wrong shape (empty image, bad
    /// dimensionality, no image set before predicting).
    MalformedInput,
    /// The device ran out of memory or another resource.
    ResourceExhausted,
    /// The predictor returned masks and scores that do not fit together
    /// or do not match the image.
    InvalidOutput,
    /// Any other failure inside the model runtime.
    Backend,
}

impl PredictionErrorKind {
    /// Stable identifier used by [`PipelineError::code`].
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MalformedInput => "prediction_malformed_input",
            Self::ResourceExhausted => "prediction_resource_exhausted",
            Self::InvalidOutput => "prediction_invalid_output",
            Self::Backend => "prediction_backend",
        }
    }
}

/// A predictor failure. Never retried by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({kind:?})")]
pub struct PredictionError {
    kind: PredictionErrorKind,
    message: String,
}

impl PredictionError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: PredictionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`PredictionErrorKind::MalformedInput`].
    #[must_use]
    pub fn malformed_input(message: impl Into<String>) -> Self {
        Self::new(PredictionErrorKind::MalformedInput, message)
    }

    /// Shorthand for [`PredictionErrorKind::ResourceExhausted`].
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(PredictionErrorKind::ResourceExhausted, message)
    }

    /// Category of the failure.
    #[must_use]
    pub const fn kind(&self) -> PredictionErrorKind {
        self.kind
    }

    /// Human-readable detail.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Raw output of one predict call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictorOutput {
    /// Candidate masks at the set image's resolution, in model order.
    pub masks: Vec<BinaryMask>,
    /// One score per mask.
    pub scores: Vec<f32>,
    /// Per-mask IoU predictions, when the model reports them apart from
    /// `scores`.
    pub iou_predictions: Option<Vec<f32>>,
    /// Low-resolution mask logits, one flattened map per mask. Empty when
    /// the backend does not expose them.
    pub logits: Vec<Vec<f32>>,
}

/// A promptable segmentation model with per-image session state.
pub trait Predictor {
    /// Embed `image` and keep it as the target of later predict calls.
    ///
    /// # Errors
    ///
    /// Returns a [`PredictionError`] if the image cannot be processed.
    fn set_image(&mut self, image: &RgbImage) -> Result<(), PredictionError>;

    /// Predict masks for the currently set image.
    ///
    /// `point_coords` are `(x, y)` pixel positions and `point_labels`
    /// holds 1 for foreground and 0 for background, index-aligned. With
    /// `multi_output` the model returns several candidates instead of one.
    ///
    /// # Errors
    ///
    /// Returns a [`PredictionError`] on malformed input or runtime failure.
    fn predict(
        &mut self,
        point_coords: &[[i32; 2]],
        point_labels: &[i32],
        multi_output: bool,
    ) -> Result<PredictorOutput, PredictionError>;
}

/// Encode a prompt set into the predictor's parallel coordinate and
/// label arrays: included points first, then excluded, each in order.
#[must_use]
pub fn encode_prompts(prompts: &PromptSet) -> (Vec<[i32; 2]>, Vec<i32>) {
    let included = prompts
        .included
        .iter()
        .map(|&(x, y)| ([x, y], PointKind::Included.predictor_label()));
    let excluded = prompts
        .excluded
        .iter()
        .map(|&(x, y)| ([x, y], PointKind::Excluded.predictor_label()));
    included.chain(excluded).unzip()
}

/// Serializes access to a pool of predictor instances.
///
/// A request locks one instance for the whole set-image/predict sequence.
/// With a pool of N instances, up to N requests run at the same time.
#[derive(Debug)]
pub struct PredictorAdapter<P> {
    slots: Vec<Mutex<P>>,
    next: AtomicUsize,
    device: ResolvedDevice,
    multi_output: bool,
}

impl<P: Predictor> PredictorAdapter<P> {
    /// Wrap a single predictor instance.
    #[must_use]
    pub fn new(predictor: P, device: ResolvedDevice) -> Self {
        Self {
            slots: vec![Mutex::new(predictor)],
            next: AtomicUsize::new(0),
            device,
            multi_output: true,
        }
    }

    /// Wrap several independent instances of the same model.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `predictors` is empty.
    pub fn with_pool(predictors: Vec<P>, device: ResolvedDevice) -> Result<Self, PipelineError> {
        if predictors.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "predictor pool needs at least one instance".to_owned(),
            ));
        }
        Ok(Self {
            slots: predictors.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
            device,
            multi_output: true,
        })
    }

    /// Request one candidate instead of several.
    #[must_use]
    pub fn with_multi_output(mut self, multi_output: bool) -> Self {
        self.multi_output = multi_output;
        self
    }

    /// The device the predictors were set up for.
    #[must_use]
    pub const fn device(&self) -> &ResolvedDevice {
        &self.device
    }

    /// Number of predictor instances.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// Run the predictor on `image` with `prompts`.
    ///
    /// Candidates are returned in the predictor's order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyPrompt`] without touching the
    /// predictor if `prompts.included` is empty, and
    /// [`PipelineError::Prediction`] if the predictor fails or its output
    /// does not match the image.
    #[tracing::instrument(
        skip_all,
        fields(
            width = image.width(),
            height = image.height(),
            included = prompts.included.len(),
            excluded = prompts.excluded.len(),
        )
    )]
    pub fn predict(
        &self,
        image: &RgbImage,
        prompts: &PromptSet,
    ) -> Result<Vec<CandidateMask>, PipelineError> {
        if prompts.included.is_empty() {
            return Err(PipelineError::EmptyPrompt);
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(PredictionError::malformed_input(format!(
                "image is empty ({})",
                Dimensions::of(image)
            ))
            .into());
        }

        let (coords, labels) = encode_prompts(prompts);

        let output = {
            let mut predictor = self.acquire();
            predictor.set_image(image)?;
            predictor.predict(&coords, &labels, self.multi_output)?
        };

        let candidates = assemble_candidates(output, Dimensions::of(image))?;
        tracing::debug!(candidates = candidates.len(), "predictor returned");
        Ok(candidates)
    }

    /// Lock a free instance, or wait on the next one in rotation.
    ///
    /// When every instance is busy the caller blocks on its rotation slot
    /// even if another instance frees up first, so a slow request can hold
    /// up the ones queued behind it while other instances sit idle.
    fn acquire(&self) -> MutexGuard<'_, P> {
        let count = self.slots.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;

        for offset in 0..count {
            match self.slots[(start + offset) % count].try_lock() {
                Ok(guard) => return guard,
                // Every request starts with set_image, so state left
                // behind by a panicked request is overwritten.
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {}
            }
        }

        self.slots[start]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Zip masks with their scores, checking that everything lines up.
fn assemble_candidates(
    output: PredictorOutput,
    image: Dimensions,
) -> Result<Vec<CandidateMask>, PredictionError> {
    let PredictorOutput {
        masks,
        scores,
        iou_predictions,
        ..
    } = output;

    if masks.len() != scores.len() {
        return Err(PredictionError::new(
            PredictionErrorKind::InvalidOutput,
            format!("{} masks but {} scores", masks.len(), scores.len()),
        ));
    }
    if let Some(ious) = &iou_predictions
        && ious.len() != masks.len()
    {
        return Err(PredictionError::new(
            PredictionErrorKind::InvalidOutput,
            format!("{} masks but {} IoU predictions", masks.len(), ious.len()),
        ));
    }
    if let Some(bad) = masks.iter().find(|m| m.dimensions() != image) {
        return Err(PredictionError::new(
            PredictionErrorKind::InvalidOutput,
            format!("mask is {} but image is {image}", bad.dimensions()),
        ));
    }

    Ok(masks
        .into_iter()
        .zip(scores)
        .enumerate()
        .map(|(i, (mask, score))| CandidateMask {
            mask,
            score,
            iou_prediction: iou_predictions.as_ref().map(|ious| ious[i]),
        })
        .collect())
}
