//! Mask selection: choose one candidate from the predictor's output.
//!
//! This module defines the [`MaskSelector`] trait for pluggable
//! selection policies and the [`MaskSelectorKind`] enum for choosing a
//! built-in one from configuration.
//!
//! # Strategy pattern
//!
//! Which candidate is kept decides mask quality more than any other
//! setting. The orchestrator only ever calls [`select`] with whatever
//! policy it was given, so a new ranking can be added as a variant or
//! passed in as a closure without touching the pipeline.

use serde::{Deserialize, Serialize};

use crate::types::{CandidateMask, PipelineError, SelectedMask};

/// Selects which built-in policy picks the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskSelectorKind {
    /// The first candidate, which the predictor ranks highest.
    #[default]
    First,

    /// The candidate with the largest `score`. Ties keep the earlier one.
    HighestScore,

    /// The candidate with the largest predicted IoU, using `score` for
    /// candidates without one. Ties keep the earlier one.
    HighestIou,
}

/// Trait for selection policies.
///
/// Input: the non-empty candidate list in predictor order.
/// Output: the index of the candidate to keep, or `None` to give up.
///
/// Implemented for [`MaskSelectorKind`] and for any
/// `Fn(&[CandidateMask]) -> Option<usize>`.
pub trait MaskSelector {
    /// Pick a candidate by index.
    fn choose(&self, candidates: &[CandidateMask]) -> Option<usize>;
}

impl MaskSelector for MaskSelectorKind {
    fn choose(&self, candidates: &[CandidateMask]) -> Option<usize> {
        match *self {
            Self::First => first(candidates),
            Self::HighestScore => highest_by(candidates, |c| c.score),
            Self::HighestIou => highest_by(candidates, |c| c.iou_prediction.unwrap_or(c.score)),
        }
    }
}

impl<F> MaskSelector for F
where
    F: Fn(&[CandidateMask]) -> Option<usize>,
{
    fn choose(&self, candidates: &[CandidateMask]) -> Option<usize> {
        self(candidates)
    }
}

/// Apply `selector` to `candidates` and take the chosen one out.
///
/// # Errors
///
/// Returns [`PipelineError::NoMaskProduced`] if `candidates` is empty, or
/// if the policy returns no index or one past the end.
pub fn select<S>(
    mut candidates: Vec<CandidateMask>,
    selector: &S,
) -> Result<SelectedMask, PipelineError>
where
    S: MaskSelector + ?Sized,
{
    if candidates.is_empty() {
        return Err(PipelineError::NoMaskProduced);
    }

    let index = selector
        .choose(&candidates)
        .filter(|&i| i < candidates.len())
        .ok_or(PipelineError::NoMaskProduced)?;

    let chosen = candidates.swap_remove(index);
    tracing::debug!(index, score = chosen.score, "selected candidate mask");
    Ok(SelectedMask::new(chosen, index))
}

fn first(candidates: &[CandidateMask]) -> Option<usize> {
    (!candidates.is_empty()).then_some(0)
}

/// Index of the largest key. NaN keys never win; `None` if every key is NaN.
fn highest_by(candidates: &[CandidateMask], key: impl Fn(&CandidateMask) -> f32) -> Option<usize> {
    candidates
        .iter()
        .map(key)
        .enumerate()
        .filter(|(_, k)| !k.is_nan())
        .reduce(|best, current| if current.1 > best.1 { current } else { best })
        .map(|(i, _)| i)
}
