//! Pipeline diagnostics: timing and counts for each stage of a run.
//!
//! Collected by [`Pipeline::run_with_diagnostics`](crate::Pipeline::run_with_diagnostics).
//! Time is read through the [`Clock`] trait so the core stays free of
//! platform clocks; callers pass a clock backed by
//! `std::time::Instant` (or anything else that measures durations).
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// Current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Clock that measures nothing. Every duration is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl Clock for NoClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, _since: &()) -> Duration {
        Duration::ZERO
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
///
/// `decode` is `None` when the run started from an already decoded image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 0: image decoding.
    pub decode: Option<StageDiagnostics>,
    /// Stage 1: prompt building.
    pub prompt: StageDiagnostics,
    /// Stage 2: predictor call (set image + predict).
    pub predict: StageDiagnostics,
    /// Stage 3: mask selection.
    pub select: StageDiagnostics,
    /// Stage 4: compositing.
    pub composite: StageDiagnostics,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding metrics.
    Decode {
        /// Size of the input image bytes.
        input_bytes: usize,
        /// Decoded width in pixels.
        width: u32,
        /// Decoded height in pixels.
        height: u32,
    },
    /// Prompt building metrics.
    Prompt {
        /// Number of foreground points.
        included: usize,
        /// Number of background points.
        excluded: usize,
    },
    /// Predictor metrics.
    Predict {
        /// Number of candidate masks returned.
        candidate_count: usize,
    },
    /// Selection metrics.
    Select {
        /// Index of the chosen candidate.
        index: usize,
        /// Score of the chosen candidate.
        score: f32,
    },
    /// Compositing metrics.
    Composite {
        /// Number of masked pixels.
        masked_pixels: usize,
        /// Total pixel count.
        total_pixels: u64,
    },
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(72));

        let total_ms = duration_ms(self.total_duration);

        let mut stages: Vec<(&str, &StageDiagnostics)> = Vec::with_capacity(5);
        if let Some(ref decode) = self.decode {
            stages.push(("Decode", decode));
        }
        stages.push(("Prompt", &self.prompt));
        stages.push(("Predict", &self.predict));
        stages.push(("Select", &self.select));
        stages.push(("Composite", &self.composite));

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Prompt { included, excluded } => {
            format!("included={included} excluded={excluded}")
        }
        StageMetrics::Predict { candidate_count } => format!("candidates={candidate_count}"),
        StageMetrics::Select { index, score } => format!("index={index} score={score:.3}"),
        StageMetrics::Composite {
            masked_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let coverage = if *total_pixels > 0 {
                *masked_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            format!("masked={masked_pixels} ({coverage:.1}%)")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stage(ms: u64, metrics: StageMetrics) -> StageDiagnostics {
        StageDiagnostics {
            duration: Duration::from_millis(ms),
            metrics,
        }
    }

    fn sample(decode: bool) -> PipelineDiagnostics {
        PipelineDiagnostics {
            decode: decode.then(|| {
                stage(
                    2,
                    StageMetrics::Decode {
                        input_bytes: 512,
                        width: 4,
                        height: 4,
                    },
                )
            }),
            prompt: stage(
                0,
                StageMetrics::Prompt {
                    included: 1,
                    excluded: 2,
                },
            ),
            predict: stage(
                40,
                StageMetrics::Predict {
                    candidate_count: 3,
                },
            ),
            select: stage(0, StageMetrics::Select { index: 0, score: 0.9 }),
            composite: stage(
                1,
                StageMetrics::Composite {
                    masked_pixels: 2,
                    total_pixels: 16,
                },
            ),
            total_duration: Duration::from_millis(43),
        }
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample(true).report();
        for name in ["Decode", "Prompt", "Predict", "Select", "Composite"] {
            assert!(report.contains(name), "missing {name} in:\n{report}");
        }
        assert!(report.contains("masked=2 (12.5%)"));
        assert!(report.contains("512 bytes -> 4x4"));
    }

    #[test]
    fn report_skips_decode_when_absent() {
        let report = sample(false).report();
        assert!(!report.contains("Decode"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample(true)).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 0.043).abs() < 1e-9);
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, Duration::from_millis(43));
    }

    #[test]
    fn no_clock_measures_zero() {
        let clock = NoClock;
        let start = clock.now();
        assert_eq!(clock.elapsed(&start), Duration::ZERO);
    }
}
