pub mod capture_thread;
pub mod config;
pub mod control;
pub mod converter;
pub mod device;
pub mod error;
pub mod events;
pub mod format;
pub mod frame;
pub mod gate;
pub mod logging;
pub mod source;

pub use capture_thread::{CaptureThread, LoopContext, LoopExit, ThreadPhase};
pub use config::{CamdevConfig, CameraConfig, LoggingConfig};
pub use control::{ControlChannel, ControlMessage, WaitOutcome};
pub use converter::PixelConverter;
pub use device::{CaptureDevice, CaptureDeviceBuilder, DeviceOptions, DeviceState, StreamGeometry};
pub use error::{status_of, CameraError, ErrorKind, Result};
pub use events::{DeviceEvent, EventEmitter};
pub use format::{fourcc, fourcc_to_string, PixelFormat};
pub use frame::{FrameBuffer, FrameStore};
pub use gate::Gate;
pub use logging::{init_logging, LogSink, NullSink, TracingSink};
pub use source::{open_source, CaptureSource, DeviceNodeSource, SyntheticFeed, SyntheticSource};
