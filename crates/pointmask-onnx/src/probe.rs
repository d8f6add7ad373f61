//! Accelerator discovery through ONNX Runtime's execution providers.

use ort::execution_providers::{CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider};
use pointmask_pipeline::DeviceProbe;
use pointmask_pipeline::device::CudaInfo;

/// Reports the execution providers this ONNX Runtime build can use.
///
/// CUDA stands in for NVIDIA GPUs and CoreML for Apple silicon. ONNX
/// Runtime does not expose the compute capability, so CUDA devices are
/// reported with `compute_major` 0 and TF32 is never enabled through
/// this probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrtProbe;

impl DeviceProbe for OrtProbe {
    fn cuda(&self, _ordinal: usize) -> Option<CudaInfo> {
        let available = CUDAExecutionProvider::default()
            .is_available()
            .unwrap_or(false);
        available.then_some(CudaInfo { compute_major: 0 })
    }

    fn mps(&self) -> bool {
        CoreMLExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
    }
}
