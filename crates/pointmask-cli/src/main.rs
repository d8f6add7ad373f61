//! pointmask: segment an image file from point prompts.
//!
//! Runs the prompt-to-mask pipeline on one image: clicks go in, a
//! blended preview (and optionally the mask) comes out. The predictor is
//! either a SAM 2 ONNX export (`--model`) or a list of recorded candidate
//! masks (`--candidate`), which needs no model weights.
//!
//! # Usage
//!
//! ```text
//! pointmask photo.jpg --model sam2_tiny.onnx --point 120,80 --point 10,10,excluded -o out.png
//! pointmask photo.jpg --candidate a.png --candidate b.png --candidate-scores 0.4,0.9 \
//!     --selector highest-score --point 120,80 --data-uri
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod backend;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use pointmask_pipeline::diagnostics::Clock;
use pointmask_pipeline::{
    BlendParams, CompositeResult, DeviceConfig, DeviceKind, MaskSelectorKind, Pipeline,
    PipelineConfig, PredictorAdapter, RawPoint, ResolvedDevice,
};
use tracing_subscriber::EnvFilter;

use crate::backend::{Backend, ReplayPredictor};

/// Segment an image from point prompts.
///
/// Each `--point` is `X,Y` or `X,Y,KIND` with KIND `included` (default)
/// or `excluded`. At least one included point is required.
#[derive(Parser)]
#[command(name = "pointmask", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// A prompt point, `X,Y[,included|excluded]`. Repeatable.
    #[arg(long = "point", value_parser = parse_point)]
    points: Vec<RawPoint>,

    /// Prompt points as JSON, `[{"x": 1, "y": 2, "type": "included"}, ...]`.
    ///
    /// Appended after any `--point` flags.
    #[arg(long)]
    points_json: Option<String>,

    /// SAM 2 ONNX model file.
    #[arg(long, required_unless_present = "candidates", conflicts_with = "candidates")]
    model: Option<PathBuf>,

    /// Pre-computed candidate mask image, replayed in order. Repeatable.
    #[arg(long = "candidate")]
    candidates: Vec<PathBuf>,

    /// Scores for the `--candidate` masks, comma separated (default 1.0 each).
    #[arg(long, value_delimiter = ',', requires = "candidates")]
    candidate_scores: Vec<f32>,

    /// Write the blended preview PNG here.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the selected mask as a grayscale PNG here.
    #[arg(long)]
    mask_output: Option<PathBuf>,

    /// Print the blended preview as a `data:image/png;base64,` URI.
    #[arg(long)]
    data_uri: bool,

    /// Overlay color as `R,G,B`.
    #[arg(long, value_parser = parse_color, default_value = "0,0,255")]
    color: [u8; 3],

    /// Overlay opacity (0.0-1.0).
    #[arg(long, default_value_t = BlendParams::DEFAULT_OPACITY)]
    opacity: f32,

    /// Candidate selection policy.
    #[arg(long, value_enum, default_value_t = Selector::First)]
    selector: Selector,

    /// Ask the predictor for a single candidate.
    #[arg(long)]
    single_output: bool,

    /// Device for the ONNX model.
    #[arg(long, value_enum, default_value_t = Device::Auto)]
    device: Device,

    /// CUDA device index, with `--device cuda`.
    #[arg(long, default_value_t = 0)]
    cuda_ordinal: usize,

    /// Intra-op threads (default: half the available cores).
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    threads: Option<usize>,

    /// Disable TF32 on CUDA devices that support it.
    #[arg(long)]
    no_tf32: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, `--color`, `--opacity`, `--selector` and
    /// `--single-output` are ignored. The JSON must be a valid
    /// `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Print per-stage timings to stderr.
    #[arg(long)]
    diagnostics: bool,
}

/// Candidate selection policy.
#[derive(Clone, Copy, ValueEnum)]
enum Selector {
    /// The predictor's first candidate.
    First,
    /// The candidate with the highest score.
    HighestScore,
    /// The candidate with the highest predicted IoU.
    HighestIou,
}

/// Device selection.
#[derive(Clone, Copy, ValueEnum)]
enum Device {
    /// CUDA, then MPS, then CPU.
    Auto,
    /// CPU only.
    Cpu,
    /// CUDA device `--cuda-ordinal`.
    Cuda,
    /// Apple silicon.
    Mps,
}

/// Parse `X,Y` or `X,Y,KIND` into a raw point.
fn parse_point(s: &str) -> Result<RawPoint, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let (x, y, kind) = match parts.as_slice() {
        [x, y] => (*x, *y, "included"),
        [x, y, kind] => (*x, *y, *kind),
        _ => return Err(format!("expected X,Y or X,Y,KIND, got {s:?}")),
    };
    let x: f64 = x.parse().map_err(|e| format!("bad x {x:?}: {e}"))?;
    let y: f64 = y.parse().map_err(|e| format!("bad y {y:?}: {e}"))?;
    Ok(RawPoint::new(x, y, kind))
}

/// Parse `R,G,B` with each channel in 0-255.
fn parse_color(s: &str) -> Result<[u8; 3], String> {
    let channels = s
        .split(',')
        .map(|c| c.trim().parse::<u8>().map_err(|e| format!("bad channel {c:?}: {e}")))
        .collect::<Result<Vec<u8>, String>>()?;
    <[u8; 3]>::try_from(channels).map_err(|c| format!("expected R,G,B, got {} channels", c.len()))
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual pipeline flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        blend: BlendParams {
            color: cli.color,
            opacity: cli.opacity,
        },
        selector: match cli.selector {
            Selector::First => MaskSelectorKind::First,
            Selector::HighestScore => MaskSelectorKind::HighestScore,
            Selector::HighestIou => MaskSelectorKind::HighestIou,
        },
        multi_output: !cli.single_output,
    })
}

/// Build a [`DeviceConfig`] from CLI arguments.
fn device_config_from_cli(cli: &Cli) -> DeviceConfig {
    DeviceConfig {
        device: match cli.device {
            Device::Auto => DeviceKind::Auto,
            Device::Cpu => DeviceKind::Cpu,
            Device::Cuda => DeviceKind::Cuda {
                ordinal: cli.cuda_ordinal,
            },
            Device::Mps => DeviceKind::Mps,
        },
        allow_tf32: !cli.no_tf32,
        intra_threads: cli.threads,
        ..DeviceConfig::default()
    }
}

/// Collect `--point` and `--points-json` prompts, flags first.
fn points_from_cli(cli: &Cli) -> Result<Vec<RawPoint>, String> {
    let mut points = cli.points.clone();
    if let Some(ref json) = cli.points_json {
        let extra: Vec<RawPoint> =
            serde_json::from_str(json).map_err(|e| format!("Error parsing --points-json: {e}"))?;
        points.extend(extra);
    }
    Ok(points)
}

/// Set up the predictor named on the command line.
fn backend_from_cli(cli: &Cli) -> Result<(Backend, ResolvedDevice), String> {
    if let Some(ref model) = cli.model {
        let device = device_config_from_cli(cli).resolve(&pointmask_onnx::OrtProbe);
        let predictor = pointmask_onnx::OnnxSam2Predictor::load(model, &device)
            .map_err(|e| format!("Error loading model {}: {e}", model.display()))?;
        return Ok((Backend::Onnx(Box::new(predictor)), device));
    }

    let replay = ReplayPredictor::load(&cli.candidates, cli.candidate_scores.clone())?;
    Ok((Backend::Replay(replay), ResolvedDevice::cpu(1)))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let points = points_from_cli(cli)?;
    tracing::debug!(?config, "pipeline configuration");

    let image_bytes = std::fs::read(&cli.image_path)
        .map_err(|e| format!("Error reading {}: {e}", cli.image_path.display()))?;
    eprintln!(
        "Image: {} ({} bytes), {} points",
        cli.image_path.display(),
        image_bytes.len(),
        points.len(),
    );

    let (backend, device) = backend_from_cli(cli)?;
    let pipeline = Pipeline::new(PredictorAdapter::new(backend, device), &config)
        .map_err(|e| format!("Invalid configuration: {e}"))?;

    let result = if cli.diagnostics {
        let (result, diagnostics) = pipeline
            .run_with_diagnostics(&image_bytes, &points, &StdClock)
            .map_err(|e| format!("Pipeline error [{}]: {e}", e.code()))?;
        eprintln!("{}", diagnostics.report());
        result
    } else {
        pipeline
            .run(&image_bytes, &points)
            .map_err(|e| format!("Pipeline error [{}]: {e}", e.code()))?
    };

    eprintln!(
        "Selected candidate {} (score {:.3}, {} masked pixels)",
        result.selected.index(),
        result.selected.score(),
        result.selected.mask().area(),
    );

    write_outputs(cli, &result)
}

fn write_outputs(cli: &Cli, result: &CompositeResult) -> Result<(), String> {
    if let Some(ref path) = cli.output {
        let png = pointmask_export::encode_png(&result.blended).map_err(|e| e.to_string())?;
        write_file(path, &png)?;
    }
    if let Some(ref path) = cli.mask_output {
        let png =
            pointmask_export::encode_mask_png(result.selected.mask()).map_err(|e| e.to_string())?;
        write_file(path, &png)?;
    }
    if cli.data_uri {
        let uri = pointmask_export::composite_data_uri(result).map_err(|e| e.to_string())?;
        println!("{uri}");
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), String> {
    std::fs::write(path, bytes).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    eprintln!("Written to {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pointmask").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn point_defaults_to_included() {
        assert_eq!(
            parse_point("12.5, 40").unwrap(),
            RawPoint::new(12.5, 40.0, "included")
        );
        assert_eq!(
            parse_point("1,2,excluded").unwrap(),
            RawPoint::new(1.0, 2.0, "excluded")
        );
    }

    #[test]
    fn point_rejects_bad_shapes() {
        assert!(parse_point("1").is_err());
        assert!(parse_point("1,2,3,4").is_err());
        assert!(parse_point("a,2").is_err());
    }

    #[test]
    fn point_kind_is_checked_by_the_pipeline_not_the_parser() {
        assert_eq!(parse_point("1,2,maybe").unwrap().kind, "maybe");
    }

    #[test]
    fn color_needs_three_bytes() {
        assert_eq!(parse_color("255, 0,10").unwrap(), [255, 0, 10]);
        assert!(parse_color("1,2").is_err());
        assert!(parse_color("1,2,256").is_err());
    }

    #[test]
    fn flags_build_config() {
        let cli = cli(&[
            "in.png",
            "--candidate",
            "m.png",
            "--color",
            "1,2,3",
            "--opacity",
            "0.25",
            "--selector",
            "highest-iou",
            "--single-output",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.blend.color, [1, 2, 3]);
        assert!((config.blend.opacity - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.selector, MaskSelectorKind::HighestIou);
        assert!(!config.multi_output);
    }

    #[test]
    fn defaults_match_pipeline_defaults() {
        let cli = cli(&["in.png", "--candidate", "m.png"]);
        assert_eq!(config_from_cli(&cli).unwrap(), PipelineConfig::default());
        assert_eq!(device_config_from_cli(&cli), DeviceConfig::default());
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = cli(&[
            "in.png",
            "--candidate",
            "m.png",
            "--opacity",
            "0.9",
            "--config-json",
            r#"{"blend": {"opacity": 0.1}, "selector": "highest_score"}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert!((config.blend.opacity - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.blend.color, BlendParams::DEFAULT_COLOR);
        assert_eq!(config.selector, MaskSelectorKind::HighestScore);
    }

    #[test]
    fn points_json_is_appended() {
        let cli = cli(&[
            "in.png",
            "--candidate",
            "m.png",
            "--point",
            "1,1",
            "--points-json",
            r#"[{"x": 5, "y": 6, "type": "excluded"}]"#,
        ]);
        let points = points_from_cli(&cli).unwrap();
        assert_eq!(
            points,
            vec![
                RawPoint::new(1.0, 1.0, "included"),
                RawPoint::new(5.0, 6.0, "excluded"),
            ]
        );
    }

    #[test]
    fn model_or_candidates_required() {
        let args = ["pointmask", "in.png", "--point", "1,1"];
        assert!(Cli::try_parse_from(args).is_err());
        let args = [
            "pointmask",
            "in.png",
            "--model",
            "m.onnx",
            "--candidate",
            "c.png",
        ];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn cuda_device_carries_ordinal() {
        let cli = cli(&[
            "in.png",
            "--model",
            "m.onnx",
            "--device",
            "cuda",
            "--cuda-ordinal",
            "2",
            "--no-tf32",
        ]);
        let device = device_config_from_cli(&cli);
        assert_eq!(device.device, DeviceKind::Cuda { ordinal: 2 });
        assert!(!device.allow_tf32);
    }
}
