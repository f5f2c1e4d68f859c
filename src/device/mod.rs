mod builder;
mod orchestrator;
mod state;

pub use builder::{CaptureDeviceBuilder, DeviceOptions};
pub use orchestrator::CaptureDevice;
pub use state::{DeviceState, StreamGeometry};
