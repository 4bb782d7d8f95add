mod cpu_device;
mod wgpu_device;

pub use self::cpu_device::*;
pub use self::wgpu_device::*;
