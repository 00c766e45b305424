use std::fmt;

/// Where a model's tensors live while it is resident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    /// The platform accelerator (CUDA, DirectML or CoreML).
    Accelerator,
    Cpu,
}

impl Device {
    pub fn is_accelerator(self) -> bool {
        matches!(self, Device::Accelerator)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Accelerator => f.write_str("accelerator"),
            Device::Cpu => f.write_str("cpu"),
        }
    }
}
