//! Capture sources: the hardware (or virtual) producers of raw frames.

mod device_node;
mod synthetic;

pub use device_node::DeviceNodeSource;
pub use synthetic::{SyntheticFeed, SyntheticSource};

use crate::config::CameraConfig;
use crate::error::Result;
use crate::format::PixelFormat;
use std::os::fd::RawFd;
use std::time::Duration;

/// Device name that selects the free-running [`SyntheticSource`]
pub const SYNTHETIC_DEVICE: &str = "synthetic";

/// Contract the capture loop relies on.
///
/// The loop waits on `readiness_fd` and calls `read_frame` once it becomes
/// readable. Sources without a readiness handle are read each time the
/// loop's wait times out.
pub trait CaptureSource: Send {
    /// Human readable identifier used in log messages
    fn name(&self) -> &str;

    /// Negotiate the stream geometry before frames are delivered.
    fn configure(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<()>;

    /// Descriptor that becomes readable when a frame is available.
    fn readiness_fd(&self) -> Option<RawFd>;

    /// Fill `buf` with exactly one frame of the negotiated size.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<()>;
}

/// Open the source named by the camera configuration.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn CaptureSource>> {
    if config.device == SYNTHETIC_DEVICE {
        let interval = Duration::from_micros(1_000_000 / u64::from(config.fps.max(1)));
        Ok(Box::new(SyntheticSource::free_running(interval)?))
    } else {
        Ok(Box::new(DeviceNodeSource::open(&config.device)?))
    }
}
