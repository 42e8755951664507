//! Serializable device identifier.
use serde::{Deserialize, Serialize};

/// Device on which tensors are placed, the serializable counterpart of
/// [`tch::Device`]. Used in configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// A CUDA device of the given index.
    Cuda(usize),
}

impl From<Device> for tch::Device {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => tch::Device::Cpu,
            Device::Cuda(n) => tch::Device::Cuda(n),
        }
    }
}

impl From<tch::Device> for Device {
    fn from(device: tch::Device) -> Self {
        match device {
            tch::Device::Cpu => Device::Cpu,
            tch::Device::Cuda(n) => Device::Cuda(n),
            _ => unimplemented!(),
        }
    }
}
