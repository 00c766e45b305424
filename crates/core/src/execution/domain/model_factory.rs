use crate::classification::domain::sequence_model::SequenceModel;
use crate::execution::domain::device::Device;

/// Builds a ready-to-run sequence model on a given device.
///
/// Called by the execution controller under its lock, so implementations
/// never see two concurrent loads.
pub trait ModelFactory: Send + Sync {
    fn load(&self, device: Device) -> Result<Box<dyn SequenceModel>, Box<dyn std::error::Error>>;
}
