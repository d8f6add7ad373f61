//! Prompt building: raw annotation points to a [`PromptSet`].
//!
//! This is the first step of the pipeline. Points are partitioned by
//! polarity, keeping annotation order inside each list, and their
//! coordinates are truncated to whole pixels. Duplicates are kept; the
//! predictor treats them as independent samples.

use crate::types::{PipelineError, PointKind, PromptSet, RawPoint};

/// Partition raw annotation points into included and excluded lists.
///
/// Coordinates are truncated toward zero. Finite values beyond the `i32`
/// range saturate; bounds against the image are not checked here.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidPrompt`] if a point's kind is neither
/// `included` nor `excluded`, or if a coordinate is NaN or infinite.
pub fn build(raw_points: &[RawPoint]) -> Result<PromptSet, PipelineError> {
    let mut prompts = PromptSet::default();

    for (index, point) in raw_points.iter().enumerate() {
        let kind = PointKind::from_label(&point.kind).ok_or_else(|| PipelineError::InvalidPrompt {
            index,
            reason: format!("unknown point kind {:?}", point.kind),
        })?;
        let x = coerce(point.x, index, "x")?;
        let y = coerce(point.y, index, "y")?;

        match kind {
            PointKind::Included => prompts.included.push((x, y)),
            PointKind::Excluded => prompts.excluded.push((x, y)),
        }
    }

    tracing::debug!(
        included = prompts.included.len(),
        excluded = prompts.excluded.len(),
        "built prompt set"
    );
    Ok(prompts)
}

#[allow(clippy::cast_possible_truncation)]
fn coerce(value: f64, index: usize, axis: &str) -> Result<i32, PipelineError> {
    if !value.is_finite() {
        return Err(PipelineError::InvalidPrompt {
            index,
            reason: format!("{axis} coordinate is not a finite number"),
        });
    }
    // Float-to-int `as` truncates toward zero and saturates.
    Ok(value.trunc() as i32)
}
