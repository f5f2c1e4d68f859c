use crate::error::Result;
use crate::format::PixelFormat;
use std::fmt;

/// Lifecycle of a [`CaptureDevice`](super::CaptureDevice).
///
/// `Constructed -> Initialized -> Started -> Initialized -> ...`; only
/// `initialize` leaves `Constructed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    Constructed,
    Initialized,
    /// The stream is configured and its frame buffer allocated
    Started,
}

impl DeviceState {
    pub fn is_initialized(&self) -> bool {
        *self >= DeviceState::Initialized
    }

    pub fn is_started(&self) -> bool {
        *self == DeviceState::Started
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Constructed => "constructed",
            DeviceState::Initialized => "initialized",
            DeviceState::Started => "started",
        };
        f.write_str(name)
    }
}

/// Geometry of the running stream, always set and cleared as one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Exactly `format.frame_size(width, height)`
    pub frame_size: usize,
}

impl StreamGeometry {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        Ok(Self {
            width,
            height,
            format,
            frame_size: format.frame_size(width, height)?,
        })
    }

    pub fn total_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}
