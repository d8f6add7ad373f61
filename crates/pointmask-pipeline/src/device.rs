//! Device and precision selection for the predictor.
//!
//! Resolved once at startup and handed to the predictor adapter; the
//! pipeline never re-resolves it per request. What hardware is actually
//! present is asked through a [`DeviceProbe`] so the policy stays
//! testable without an accelerator.

use serde::{Deserialize, Serialize};

/// Which device the predictor should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// CUDA if present, then Apple MPS, then CPU.
    #[default]
    Auto,
    /// Always the CPU.
    Cpu,
    /// A specific CUDA device.
    Cuda {
        /// Device index.
        ordinal: usize,
    },
    /// Apple Metal Performance Shaders.
    Mps,
}

/// Numeric precision for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// bfloat16 on CUDA, full precision elsewhere.
    #[default]
    Auto,
    /// 32-bit floats.
    Full,
    /// bfloat16 autocast. Only honored on CUDA.
    BFloat16,
}

/// Requested device setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Requested device.
    pub device: DeviceKind,
    /// Requested precision.
    pub precision: Precision,
    /// Allow TF32 matmuls on Ampere or newer CUDA devices.
    pub allow_tf32: bool,
    /// Intra-op thread count. `None` uses half the available cores.
    pub intra_threads: Option<usize>,
}

impl DeviceConfig {
    /// Default for [`allow_tf32`](Self::allow_tf32).
    pub const DEFAULT_ALLOW_TF32: bool = true;
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::default(),
            precision: Precision::default(),
            allow_tf32: Self::DEFAULT_ALLOW_TF32,
            intra_threads: None,
        }
    }
}

/// Information about one CUDA device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CudaInfo {
    /// Compute capability major version (8 = Ampere).
    pub compute_major: u32,
}

/// Reports which accelerators are present.
pub trait DeviceProbe {
    /// Properties of CUDA device `ordinal`, if it exists.
    fn cuda(&self, ordinal: usize) -> Option<CudaInfo>;

    /// Whether Apple MPS is available.
    fn mps(&self) -> bool;

    /// Number of cores available to this process.
    fn available_threads(&self) -> usize {
        std::thread::available_parallelism().map_or(4, std::num::NonZero::get)
    }
}

/// Probe for builds without accelerator support.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuOnly;

impl DeviceProbe for CpuOnly {
    fn cuda(&self, _ordinal: usize) -> Option<CudaInfo> {
        None
    }

    fn mps(&self) -> bool {
        false
    }
}

/// The device actually selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedDeviceKind {
    /// CPU.
    Cpu,
    /// CUDA device by index.
    Cuda {
        /// Device index.
        ordinal: usize,
    },
    /// Apple MPS.
    Mps,
}

/// Device setup after resolution against a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDevice {
    /// Selected device.
    pub kind: ResolvedDeviceKind,
    /// Effective precision; never [`Precision::Auto`].
    pub precision: Precision,
    /// Whether TF32 matmuls are enabled.
    pub tf32: bool,
    /// Intra-op thread count, at least 1.
    pub intra_threads: usize,
}

impl ResolvedDevice {
    /// Plain CPU setup with full precision.
    #[must_use]
    pub const fn cpu(intra_threads: usize) -> Self {
        Self {
            kind: ResolvedDeviceKind::Cpu,
            precision: Precision::Full,
            tf32: false,
            intra_threads: if intra_threads == 0 { 1 } else { intra_threads },
        }
    }

    /// Whether the selected device is the CPU.
    #[must_use]
    pub const fn is_cpu(&self) -> bool {
        matches!(self.kind, ResolvedDeviceKind::Cpu)
    }
}

impl DeviceConfig {
    /// Resolve the requested setup against what `probe` reports.
    ///
    /// A device that was asked for explicitly but is missing falls back
    /// to the CPU with a warning.
    #[must_use]
    pub fn resolve(&self, probe: &impl DeviceProbe) -> ResolvedDevice {
        let (kind, cuda) = match self.device {
            DeviceKind::Auto => probe.cuda(0).map_or_else(
                || {
                    if probe.mps() {
                        (ResolvedDeviceKind::Mps, None)
                    } else {
                        (ResolvedDeviceKind::Cpu, None)
                    }
                },
                |info| (ResolvedDeviceKind::Cuda { ordinal: 0 }, Some(info)),
            ),
            DeviceKind::Cpu => (ResolvedDeviceKind::Cpu, None),
            DeviceKind::Cuda { ordinal } => match probe.cuda(ordinal) {
                Some(info) => (ResolvedDeviceKind::Cuda { ordinal }, Some(info)),
                None => {
                    tracing::warn!(ordinal, "CUDA device not available, falling back to CPU");
                    (ResolvedDeviceKind::Cpu, None)
                }
            },
            DeviceKind::Mps => {
                if probe.mps() {
                    (ResolvedDeviceKind::Mps, None)
                } else {
                    tracing::warn!("MPS not available, falling back to CPU");
                    (ResolvedDeviceKind::Cpu, None)
                }
            }
        };

        if kind == ResolvedDeviceKind::Mps {
            tracing::warn!(
                "support for MPS devices is preliminary; results may differ numerically from CUDA"
            );
        }

        let on_cuda = cuda.is_some();
        let precision = match self.precision {
            Precision::Auto | Precision::BFloat16 if on_cuda => Precision::BFloat16,
            Precision::BFloat16 => {
                tracing::warn!("bfloat16 requested without CUDA, using full precision");
                Precision::Full
            }
            Precision::Auto | Precision::Full => Precision::Full,
        };
        let tf32 = self.allow_tf32 && cuda.is_some_and(|info| info.compute_major >= 8);
        let intra_threads = self
            .intra_threads
            .unwrap_or_else(|| probe.available_threads() / 2)
            .max(1);

        let resolved = ResolvedDevice {
            kind,
            precision,
            tf32,
            intra_threads,
        };
        tracing::info!(?resolved, "resolved predictor device");
        resolved
    }
}
