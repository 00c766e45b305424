use ort::execution_providers::{CPUExecutionProvider, ExecutionProvider, ExecutionProviderDispatch};

use crate::execution::domain::device::Device;

/// Execution providers to register for a session placed on `device`.
///
/// The accelerator list ends with CPU so nodes the accelerator can't run
/// still execute.
pub fn providers_for(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Accelerator => vec![
            accelerator_provider(),
            CPUExecutionProvider::default().build(),
        ],
        Device::Cpu => vec![CPUExecutionProvider::default().build()],
    }
}

/// Pick the primary device once at startup.
///
/// Returns [`Device::Accelerator`] only when ONNX Runtime reports the
/// platform provider as usable.
pub fn select_primary_device(force_cpu: bool) -> Device {
    if force_cpu {
        log::info!("Accelerator disabled by configuration; using CPU");
        return Device::Cpu;
    }
    match accelerator_available() {
        Ok(true) => {
            log::info!("Using {} execution provider", ACCELERATOR_NAME);
            Device::Accelerator
        }
        Ok(false) => {
            log::info!("{} execution provider unavailable; using CPU", ACCELERATOR_NAME);
            Device::Cpu
        }
        Err(e) => {
            log::warn!("Failed to check {} execution provider: {e}; using CPU", ACCELERATOR_NAME);
            Device::Cpu
        }
    }
}

#[cfg(target_os = "macos")]
const ACCELERATOR_NAME: &str = "CoreML";
#[cfg(target_os = "windows")]
const ACCELERATOR_NAME: &str = "DirectML";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const ACCELERATOR_NAME: &str = "CUDA";

#[cfg(target_os = "macos")]
fn accelerator_provider() -> ExecutionProviderDispatch {
    ort::execution_providers::CoreMLExecutionProvider::default().build()
}

#[cfg(target_os = "windows")]
fn accelerator_provider() -> ExecutionProviderDispatch {
    ort::execution_providers::DirectMLExecutionProvider::default().build()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn accelerator_provider() -> ExecutionProviderDispatch {
    ort::execution_providers::CUDAExecutionProvider::default().build()
}

#[cfg(target_os = "macos")]
fn accelerator_available() -> ort::Result<bool> {
    ort::execution_providers::CoreMLExecutionProvider::default().is_available()
}

#[cfg(target_os = "windows")]
fn accelerator_available() -> ort::Result<bool> {
    ort::execution_providers::DirectMLExecutionProvider::default().is_available()
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn accelerator_available() -> ort::Result<bool> {
    ort::execution_providers::CUDAExecutionProvider::default().is_available()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_cpu_skips_accelerator_check() {
        assert_eq!(select_primary_device(true), Device::Cpu);
    }

    #[test]
    fn test_provider_lists() {
        assert_eq!(providers_for(Device::Cpu).len(), 1);
        assert_eq!(providers_for(Device::Accelerator).len(), 2);
    }
}
