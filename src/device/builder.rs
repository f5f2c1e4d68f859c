use super::orchestrator::CaptureDevice;
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::events::EventEmitter;
use crate::format::PixelFormat;
use crate::logging::{LogSink, TracingSink};
use crate::source::CaptureSource;
use std::sync::Arc;
use std::time::Duration;

/// Tunables of a [`CaptureDevice`] that do not change over its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Layout frames are converted to for consumers
    pub output_format: PixelFormat,
    /// Capture loop wait timeout; `None` waits indefinitely
    pub poll_timeout: Option<Duration>,
    /// Upper bound on how long a still capture waits for a fresh frame
    pub picture_timeout: Duration,
}

impl DeviceOptions {
    pub fn from_config(config: &CameraConfig) -> Result<Self> {
        Ok(Self {
            output_format: config.output_format()?,
            poll_timeout: config.poll_timeout(),
            picture_timeout: config.picture_timeout(),
        })
    }
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            output_format: PixelFormat::Nv21,
            poll_timeout: None,
            picture_timeout: Duration::from_secs(2),
        }
    }
}

/// Builder for [`CaptureDevice`]
pub struct CaptureDeviceBuilder {
    source: Option<Box<dyn CaptureSource>>,
    options: DeviceOptions,
    log: Option<Arc<dyn LogSink>>,
    events: EventEmitter,
}

impl CaptureDeviceBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            options: DeviceOptions::default(),
            log: None,
            events: EventEmitter::disabled(),
        }
    }

    pub fn source(mut self, source: Box<dyn CaptureSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn options(mut self, options: DeviceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn output_format(mut self, format: PixelFormat) -> Self {
        self.options.output_format = format;
        self
    }

    pub fn poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.poll_timeout = timeout;
        self
    }

    pub fn picture_timeout(mut self, timeout: Duration) -> Self {
        self.options.picture_timeout = timeout;
        self
    }

    /// Sink for the device's log records; defaults to [`TracingSink`]
    pub fn log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Result<CaptureDevice> {
        let source = self
            .source
            .ok_or_else(|| CameraError::invalid_argument("Capture source must be specified"))?;

        if self.options.picture_timeout.is_zero() {
            return Err(CameraError::invalid_argument(
                "Picture timeout must be greater than 0",
            ));
        }

        let log = self.log.unwrap_or_else(|| Arc::new(TracingSink));
        Ok(CaptureDevice::new(source, self.options, log, self.events))
    }
}

impl Default for CaptureDeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
