//! The orchestrator: one request from raw points to a composited image.
//!
//! Stages run in a fixed order and the first failure ends the run:
//!
//! 1. Build the prompt set from raw points
//! 2. Decode the image (skipped by [`Pipeline::run_decoded`])
//! 3. Predict candidate masks (one locked predictor instance)
//! 4. Select one candidate
//! 5. Composite the selected mask onto the source
//!
//! Points are validated before the image is decoded, so a bad click never
//! pays for decoding. Errors are returned exactly as the stage raised them.

use crate::composite::{self, BlendParams};
use crate::decode;
use crate::diagnostics::{Clock, NoClock, PipelineDiagnostics, StageDiagnostics, StageMetrics};
use crate::predictor::{Predictor, PredictorAdapter};
use crate::prompt;
use crate::select::{self, MaskSelector};
use crate::types::{
    CompositeResult, Dimensions, PipelineConfig, PipelineError, RawPoint, RgbImage,
};

/// Selection policy shared by concurrent requests.
pub type SharedSelector = Box<dyn MaskSelector + Send + Sync>;

/// Prompt-to-mask pipeline over a predictor pool.
///
/// `run` takes `&self`, so a single pipeline can serve requests from
/// several threads; predictor access is serialized by the adapter.
pub struct Pipeline<P> {
    adapter: PredictorAdapter<P>,
    selector: SharedSelector,
    blend: BlendParams,
}

impl<P> std::fmt::Debug for Pipeline<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("blend", &self.blend)
            .finish_non_exhaustive()
    }
}

impl<P: Predictor> Pipeline<P> {
    /// Build a pipeline from an adapter and configuration.
    ///
    /// The adapter's multi-output flag is overridden by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidBlendParameter`] if the configured
    /// opacity is out of range.
    pub fn new(adapter: PredictorAdapter<P>, config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.blend.validate()?;
        Ok(Self {
            adapter: adapter.with_multi_output(config.multi_output),
            selector: Box::new(config.selector),
            blend: config.blend,
        })
    }

    /// Replace the configured selection policy.
    #[must_use]
    pub fn with_selector(mut self, selector: impl MaskSelector + Send + Sync + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// The predictor adapter.
    #[must_use]
    pub const fn adapter(&self) -> &PredictorAdapter<P> {
        &self.adapter
    }

    /// Blend parameters used by the compositor.
    #[must_use]
    pub const fn blend(&self) -> &BlendParams {
        &self.blend
    }

    /// Run the full pipeline on encoded image bytes.
    ///
    /// # Errors
    ///
    /// Returns the first stage error: [`PipelineError::InvalidPrompt`],
    /// [`PipelineError::EmptyInput`], [`PipelineError::ImageDecode`],
    /// [`PipelineError::EmptyPrompt`], [`PipelineError::Prediction`],
    /// [`PipelineError::NoMaskProduced`] or a compositing error.
    pub fn run(
        &self,
        raw_image: &[u8],
        raw_points: &[RawPoint],
    ) -> Result<CompositeResult, PipelineError> {
        self.staged(Input::Encoded(raw_image), raw_points, &NoClock)
            .map(|(result, _)| result)
    }

    /// Run the pipeline on an already decoded image.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), minus the decoding errors.
    pub fn run_decoded(
        &self,
        source: RgbImage,
        raw_points: &[RawPoint],
    ) -> Result<CompositeResult, PipelineError> {
        self.staged(Input::Decoded(source), raw_points, &NoClock)
            .map(|(result, _)| result)
    }

    /// Run the full pipeline and time every stage with `clock`.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run). Diagnostics are only returned on success.
    pub fn run_with_diagnostics<C: Clock>(
        &self,
        raw_image: &[u8],
        raw_points: &[RawPoint],
        clock: &C,
    ) -> Result<(CompositeResult, PipelineDiagnostics), PipelineError> {
        self.staged(Input::Encoded(raw_image), raw_points, clock)
    }

    #[allow(clippy::too_many_lines)]
    fn staged<C: Clock>(
        &self,
        input: Input<'_>,
        raw_points: &[RawPoint],
        clock: &C,
    ) -> Result<(CompositeResult, PipelineDiagnostics), PipelineError> {
        let run_start = clock.now();

        // 1. Prompt
        let start = clock.now();
        let prompts = prompt::build(raw_points)?;
        let prompt_diag = StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Prompt {
                included: prompts.included.len(),
                excluded: prompts.excluded.len(),
            },
        };

        // 2. Decode
        let (source, decode_diag) = match input {
            Input::Encoded(raw_image) => {
                let start = clock.now();
                let source = decode::decode_rgb(raw_image)?;
                let diag = StageDiagnostics {
                    duration: clock.elapsed(&start),
                    metrics: StageMetrics::Decode {
                        input_bytes: raw_image.len(),
                        width: source.width(),
                        height: source.height(),
                    },
                };
                (source, Some(diag))
            }
            Input::Decoded(source) => (source, None),
        };

        // 3. Predict
        let start = clock.now();
        let candidates = self.adapter.predict(&source, &prompts)?;
        let predict_diag = StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Predict {
                candidate_count: candidates.len(),
            },
        };

        // 4. Select
        let start = clock.now();
        let selected = select::select(candidates, self.selector.as_ref())?;
        let select_diag = StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Select {
                index: selected.index(),
                score: selected.score(),
            },
        };

        // 5. Composite
        let start = clock.now();
        let blended = composite::composite(&source, selected.mask(), &self.blend)?;
        let dimensions = Dimensions::of(&source);
        let composite_diag = StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Composite {
                masked_pixels: selected.mask().area(),
                total_pixels: dimensions.pixel_count(),
            },
        };

        let diagnostics = PipelineDiagnostics {
            decode: decode_diag,
            prompt: prompt_diag,
            predict: predict_diag,
            select: select_diag,
            composite: composite_diag,
            total_duration: clock.elapsed(&run_start),
        };

        tracing::info!(
            %dimensions,
            points = prompts.len(),
            index = selected.index(),
            score = selected.score(),
            elapsed_ms = diagnostics.total_duration.as_secs_f64() * 1000.0,
            "pipeline run complete"
        );

        Ok((
            CompositeResult {
                blended,
                source,
                selected,
                prompts,
            },
            diagnostics,
        ))
    }
}

/// Image input to a run, before or after decoding.
enum Input<'a> {
    Encoded(&'a [u8]),
    Decoded(RgbImage),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::*;
    use crate::device::ResolvedDevice;
    use crate::predictor::{PredictionError, PredictorOutput};
    use crate::select::MaskSelectorKind;
    use crate::types::{BinaryMask, CandidateMask};

    /// Returns one all-set mask per configured score.
    struct Fixed {
        scores: Vec<f32>,
        size: (u32, u32),
    }

    impl Predictor for Fixed {
        fn set_image(&mut self, image: &RgbImage) -> Result<(), PredictionError> {
            self.size = image.dimensions();
            Ok(())
        }

        fn predict(
            &mut self,
            _point_coords: &[[i32; 2]],
            _point_labels: &[i32],
            multi_output: bool,
        ) -> Result<PredictorOutput, PredictionError> {
            let count = if multi_output { self.scores.len() } else { 1 };
            let (w, h) = self.size;
            Ok(PredictorOutput {
                masks: (0..count)
                    .map(|i| BinaryMask::from_fn(w, h, |x, _| x as usize == i))
                    .collect(),
                scores: self.scores[..count].to_vec(),
                iou_predictions: None,
                logits: Vec::new(),
            })
        }
    }

    fn pipeline(scores: Vec<f32>, config: &PipelineConfig) -> Pipeline<Fixed> {
        let adapter = PredictorAdapter::new(
            Fixed {
                scores,
                size: (0, 0),
            },
            ResolvedDevice::cpu(1),
        );
        Pipeline::new(adapter, config).unwrap()
    }

    fn click() -> Vec<RawPoint> {
        vec![RawPoint::new(0.0, 0.0, "included")]
    }

    /// Advances one millisecond on every reading.
    struct StepClock(Cell<u64>);

    impl Clock for StepClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    #[test]
    fn configured_selector_is_used() {
        let config = PipelineConfig {
            selector: MaskSelectorKind::HighestScore,
            ..PipelineConfig::default()
        };
        let result = pipeline(vec![0.2, 0.9, 0.4], &config)
            .run_decoded(RgbImage::new(3, 1), &click())
            .unwrap();
        assert_eq!(result.selected.index(), 1);
        assert!(result.selected.mask().get(1, 0));
    }

    #[test]
    fn injected_selector_overrides_config() {
        let result = pipeline(vec![0.2, 0.9, 0.4], &PipelineConfig::default())
            .with_selector(|c: &[CandidateMask]| c.len().checked_sub(1))
            .run_decoded(RgbImage::new(3, 1), &click())
            .unwrap();
        assert_eq!(result.selected.index(), 2);
    }

    #[test]
    fn single_output_config_reaches_predictor() {
        let config = PipelineConfig {
            multi_output: false,
            selector: MaskSelectorKind::HighestScore,
            ..PipelineConfig::default()
        };
        let result = pipeline(vec![0.2, 0.9], &config)
            .run_decoded(RgbImage::new(2, 1), &click())
            .unwrap();
        assert_eq!(result.selected.index(), 0);
    }

    #[test]
    fn invalid_opacity_is_rejected_up_front() {
        let config = PipelineConfig {
            blend: BlendParams {
                opacity: 2.0,
                ..BlendParams::default()
            },
            ..PipelineConfig::default()
        };
        let adapter = PredictorAdapter::new(
            Fixed {
                scores: vec![1.0],
                size: (0, 0),
            },
            ResolvedDevice::cpu(1),
        );
        assert!(matches!(
            Pipeline::new(adapter, &config),
            Err(PipelineError::InvalidBlendParameter(_))
        ));
    }

    #[test]
    fn bad_point_fails_before_decoding() {
        let points = vec![RawPoint::new(0.0, 0.0, "maybe")];
        let err = pipeline(vec![1.0], &PipelineConfig::default())
            .run(&[], &points)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPrompt { index: 0, .. }));
    }

    #[test]
    fn empty_bytes_with_valid_points() {
        let err = pipeline(vec![1.0], &PipelineConfig::default())
            .run(&[], &click())
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
    }

    #[test]
    fn result_keeps_source_and_prompts() {
        let source = RgbImage::from_pixel(2, 2, image::Rgb([9, 9, 9]));
        let result = pipeline(vec![1.0], &PipelineConfig::default())
            .run_decoded(source.clone(), &click())
            .unwrap();
        assert_eq!(result.source, source);
        assert_eq!(result.prompts.included, vec![(0, 0)]);
        assert_eq!(result.dimensions(), Dimensions { width: 2, height: 2 });
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut png = Vec::new();
        let img = RgbImage::new(width, height);
        image::ImageEncoder::write_image(
            image::codecs::png::PngEncoder::new(&mut png),
            img.as_raw(),
            width,
            height,
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
        png
    }

    #[test]
    fn timed_and_untimed_runs_agree() {
        let config = PipelineConfig {
            selector: MaskSelectorKind::HighestScore,
            ..PipelineConfig::default()
        };
        let pipeline = pipeline(vec![0.2, 0.9, 0.4], &config);
        let bytes = png(3, 2);

        let plain = pipeline.run(&bytes, &click()).unwrap();
        let clock = StepClock(Cell::new(0));
        let (timed, diag) = pipeline.run_with_diagnostics(&bytes, &click(), &clock).unwrap();
        let decoded = pipeline.run_decoded(RgbImage::new(3, 2), &click()).unwrap();

        assert_eq!(plain.selected.index(), 1);
        assert_eq!(timed.selected.index(), plain.selected.index());
        assert_eq!(timed.blended, plain.blended);
        assert_eq!(decoded.blended, plain.blended);
        assert!(matches!(
            diag.select.metrics,
            StageMetrics::Select { index: 1, .. }
        ));
    }

    #[test]
    fn diagnostics_cover_every_stage() {
        let png = png(3, 2);

        let clock = StepClock(Cell::new(0));
        let (result, diag) = pipeline(vec![0.5, 0.7], &PipelineConfig::default())
            .run_with_diagnostics(&png, &click(), &clock)
            .unwrap();

        assert_eq!(result.selected.index(), 0);
        assert!(diag.decode.is_some());
        assert!(matches!(
            diag.predict.metrics,
            StageMetrics::Predict { candidate_count: 2 }
        ));
        assert!(matches!(
            diag.composite.metrics,
            StageMetrics::Composite {
                masked_pixels: 2,
                total_pixels: 6
            }
        ));
        assert!(diag.total_duration >= diag.predict.duration);
    }
}
