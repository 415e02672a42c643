use candle_core::{
    Device,
    utils::{cuda_is_available, metal_is_available},
};
use tracing::{info, warn};

/// Pick a device to run, based on compile time flags and system capabilities. We prefer CUDA over
/// Metal and Metal over CPU. `force_cpu` skips the accelerators altogether.
pub fn choose_device(force_cpu: bool) -> Device {
    // Support having been compiled in does not guarantee a working driver, so a failing
    // constructor falls back to the CPU.
    let device = if force_cpu {
        Device::Cpu
    } else if cuda_is_available() {
        Device::new_cuda(0).unwrap_or_else(|error| {
            warn!(%error, "CUDA is available, but the device could not be created");
            Device::Cpu
        })
    } else if metal_is_available() {
        Device::new_metal(0).unwrap_or_else(|error| {
            warn!(%error, "Metal is available, but the device could not be created");
            Device::Cpu
        })
    } else {
        Device::Cpu
    };
    info!(?device, "Selected device");
    device
}
