use super::builder::{CaptureDeviceBuilder, DeviceOptions};
use super::state::{DeviceState, StreamGeometry};
use crate::capture_thread::{CaptureThread, LoopContext, LoopExit, ThreadPhase};
use crate::config::{CamdevConfig, CameraConfig};
use crate::converter::PixelConverter;
use crate::error::{CameraError, Result};
use crate::events::{DeviceEvent, EventEmitter};
use crate::format::{fourcc_to_string, PixelFormat};
use crate::frame::{FrameBuffer, FrameStore};
use crate::gate::Gate;
use crate::logging::LogSink;
use crate::source::{open_source, CaptureSource};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;

/// State mutated only under the device lock
struct DeviceInner {
    state: DeviceState,
    geometry: Option<StreamGeometry>,
    thread: Option<CaptureThread>,
}

impl DeviceInner {
    fn delivering(&self) -> bool {
        self.thread.as_ref().map_or(false, CaptureThread::is_delivering)
    }

    /// A started thread not yet collected, whether or not it is still capturing
    fn thread_active(&self) -> bool {
        self.thread.as_ref().map_or(false, CaptureThread::is_active)
    }
}

/// Capture engine orchestrator.
///
/// Owns the lifecycle state, the capture thread and the frame buffer, and
/// exposes the calls made by the upstream camera service. Public calls are
/// serialised by one device lock. A still capture releases that lock while it
/// waits for its frame, and `stop_delivering_frames` waits for it through the
/// `taking_picture` gate before it signals the capture thread.
pub struct CaptureDevice {
    inner: Mutex<DeviceInner>,
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    frames: Arc<FrameStore>,
    taking_picture: Gate<bool>,
    thread_phase: Arc<Gate<ThreadPhase>>,
    options: DeviceOptions,
    log: Arc<dyn LogSink>,
    events: EventEmitter,
}

impl CaptureDevice {
    pub(super) fn new(
        source: Box<dyn CaptureSource>,
        options: DeviceOptions,
        log: Arc<dyn LogSink>,
        events: EventEmitter,
    ) -> Self {
        Self {
            inner: Mutex::new(DeviceInner {
                state: DeviceState::Constructed,
                geometry: None,
                thread: None,
            }),
            source: Arc::new(Mutex::new(source)),
            frames: Arc::new(FrameStore::new()),
            taking_picture: Gate::new(false),
            thread_phase: Arc::new(Gate::new(ThreadPhase::Idle)),
            options,
            log,
            events,
        }
    }

    pub fn builder() -> CaptureDeviceBuilder {
        CaptureDeviceBuilder::new()
    }

    /// Build a device for the source and options named by `config`.
    pub fn from_config(config: &CamdevConfig, log: Arc<dyn LogSink>) -> Result<Self> {
        config.validate()?;

        CaptureDeviceBuilder::new()
            .source(open_source(&config.camera)?)
            .options(DeviceOptions::from_config(&config.camera)?)
            .log_sink(log)
            .build()
    }

    /// Create the capture thread object. A second call is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_initialized() {
            self.log.warn(&format!(
                "Capture device is already initialized: state = {}",
                inner.state
            ));
            return Ok(());
        }

        inner.thread = Some(CaptureThread::new(
            Arc::clone(&self.thread_phase),
            Arc::clone(&self.log),
            self.events.clone(),
        ));
        inner.state = DeviceState::Initialized;

        self.log.debug("Capture device initialized");
        Ok(())
    }

    /// Configure the source and allocate the frame buffer for a new stream.
    pub fn start_device(&self, width: u32, height: u32, pix_fmt: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.is_initialized() || inner.state.is_started() {
            self.log
                .error(&format!("Cannot start device in state {}", inner.state));
            return Err(CameraError::invalid_state("start_device", inner.state.to_string()));
        }

        self.common_start_device(&mut inner, width, height, pix_fmt)?;

        let geometry = inner.geometry;
        let configured = match geometry {
            Some(g) => self.source.lock().configure(g.width, g.height, g.format),
            None => Err(CameraError::invalid_state("start_device", "without geometry")),
        };
        if let Err(e) = configured {
            self.log
                .error(&format!("Unable to configure capture source: {}", e));
            self.common_stop_device(&mut inner);
            return Err(e);
        }

        inner.state = DeviceState::Started;
        self.events.emit(DeviceEvent::DeviceStarted { width, height });
        self.log.info(&format!(
            "Capture device started: {}x{} {}",
            width,
            height,
            fourcc_to_string(pix_fmt)
        ));
        Ok(())
    }

    /// Start the stream described by the camera section of the configuration.
    pub fn start_configured(&self, config: &CameraConfig) -> Result<()> {
        let format = config.pixel_format()?;
        self.start_device(config.width, config.height, format.fourcc())
    }

    /// Stop frame delivery if needed, then release the frame buffer.
    pub fn stop_device(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.is_started() {
            self.log.warn("Capture device is not started");
            return Ok(());
        }

        self.stop_delivering_locked(&mut inner)?;
        self.common_stop_device(&mut inner);
        inner.state = DeviceState::Initialized;

        self.events.emit(DeviceEvent::DeviceStopped);
        self.log.info("Capture device stopped");
        Ok(())
    }

    /// Start the capture thread. With `one_burst` it stops itself after one frame.
    pub fn start_delivering_frames(&self, one_burst: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.is_started() {
            self.log.error("Device is not started");
            return Err(CameraError::invalid_state(
                "start_delivering_frames",
                inner.state.to_string(),
            ));
        }

        let ctx = LoopContext {
            source: Arc::clone(&self.source),
            frames: Arc::clone(&self.frames),
            poll_timeout: self.options.poll_timeout,
        };

        let Some(thread) = inner.thread.as_mut() else {
            return Err(CameraError::invalid_state(
                "start_delivering_frames",
                "without a capture thread",
            ));
        };

        if thread.is_active() {
            if !thread.is_finished() {
                return Err(CameraError::invalid_state(
                    "start_delivering_frames",
                    "delivering frames",
                ));
            }
            // a single-shot or failed run that nobody collected yet
            let exit = thread.stop_thread()?;
            self.log
                .debug(&format!("Collected finished capture thread: {:?}", exit));
        }

        thread.start_thread(one_burst, ctx).map_err(|e| {
            self.log
                .error(&format!("Unable to start capture thread: {}", e));
            e
        })
    }

    /// Stop the capture thread.
    ///
    /// Blocks until an in-flight still capture has finished and until the
    /// thread is listening for control messages. No-op when nothing is
    /// being delivered.
    pub fn stop_delivering_frames(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.stop_delivering_locked(&mut inner)
    }

    /// Copy the latest frame into `buffer`, converted to the output format.
    ///
    /// Returns the number of bytes written. Nothing is written on failure.
    pub fn get_current_frame(&self, buffer: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock();
        if !inner.state.is_started() {
            self.log.error("Device is not started");
            return Err(CameraError::invalid_state(
                "get_current_frame",
                inner.state.to_string(),
            ));
        }

        let output = self.options.output_format;
        self.frames
            .with_frame(|frame| {
                if !frame.has_frame() {
                    return Err(CameraError::invalid_state(
                        "get_current_frame",
                        "waiting for the first frame",
                    ));
                }
                PixelConverter::convert(
                    frame.data(),
                    frame.format(),
                    buffer,
                    output,
                    frame.width(),
                    frame.height(),
                )
            })
            .unwrap_or_else(|| {
                self.log.error("No framebuffer");
                Err(CameraError::invalid_argument("No frame buffer allocated"))
            })
    }

    /// Capture one still picture from the running stream into `buffer`.
    ///
    /// Waits for the next frame captured after the call, converts it to the
    /// output format and returns the number of bytes written.
    pub fn take_picture(&self, buffer: &mut [u8]) -> Result<usize> {
        let after = {
            let inner = self.inner.lock();
            if !inner.state.is_started() || !inner.delivering() {
                return Err(CameraError::invalid_state(
                    "take_picture",
                    "not delivering frames",
                ));
            }

            let needed = inner.geometry.map_or(0, |g| g.frame_size);
            if buffer.len() < needed {
                return Err(CameraError::invalid_argument(format!(
                    "Picture buffer too small: expected {}, got {}",
                    needed,
                    buffer.len()
                )));
            }

            if !self.taking_picture.transition(false, true) {
                return Err(CameraError::invalid_state(
                    "take_picture",
                    "already taking a picture",
                ));
            }
            let after = self.frames.latest_sequence();
            self.events.emit(DeviceEvent::PictureStarted);
            after
        };

        let result = self.capture_still(after, buffer);
        if let Err(e) = &result {
            self.log.error(&format!("Still capture failed: {}", e));
        }

        self.events.emit(DeviceEvent::PictureCompleted {
            sequence: result.as_ref().ok().map(|(sequence, _)| *sequence),
        });
        self.taking_picture.set(false);

        result.map(|(_, written)| written)
    }

    pub fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    pub fn geometry(&self) -> Option<StreamGeometry> {
        self.inner.lock().geometry
    }

    /// Byte size of one native frame, 0 while no stream is configured
    pub fn frame_buffer_size(&self) -> usize {
        self.inner.lock().geometry.map_or(0, |g| g.frame_size)
    }

    pub fn output_format(&self) -> PixelFormat {
        self.options.output_format
    }

    pub fn is_delivering(&self) -> bool {
        self.inner.lock().delivering()
    }

    pub fn is_taking_picture(&self) -> bool {
        self.taking_picture.get()
    }

    /// Whether the capture thread has reached its wait loop
    pub fn is_thread_running(&self) -> bool {
        self.thread_phase.get() == ThreadPhase::Running
    }

    /// Frames captured since the stream started
    pub fn frame_count(&self) -> u64 {
        self.frames.latest_sequence()
    }

    pub fn last_frame_timestamp(&self) -> Option<SystemTime> {
        self.frames.with_frame(FrameBuffer::timestamp).flatten()
    }

    fn capture_still(&self, after: u64, buffer: &mut [u8]) -> Result<(u64, usize)> {
        self.frames
            .wait_for_frame_after(after, self.options.picture_timeout)
            .ok_or(CameraError::Timeout {
                operation: "a still picture frame",
            })?;

        let output = self.options.output_format;
        self.frames
            .with_frame(|frame| {
                PixelConverter::convert(
                    frame.data(),
                    frame.format(),
                    buffer,
                    output,
                    frame.width(),
                    frame.height(),
                )
                .map(|written| (frame.sequence(), written))
            })
            .unwrap_or_else(|| {
                Err(CameraError::invalid_state(
                    "take_picture",
                    "stream stopped during capture",
                ))
            })
    }

    fn stop_delivering_locked(&self, inner: &mut DeviceInner) -> Result<()> {
        if !inner.state.is_started() || !inner.thread_active() {
            self.log.debug("Capture device is not delivering frames");
            return Ok(());
        }

        if self.taking_picture.get() {
            self.log
                .warn("Waiting for the still capture to finish before stopping the capture thread");
        }
        self.taking_picture.wait_while(|busy| *busy);

        if self.thread_phase.get() == ThreadPhase::Starting {
            self.log
                .warn("Stop requested before the capture thread is running, waiting for it");
        }
        self.thread_phase.wait_while(|phase| *phase == ThreadPhase::Starting);

        let Some(thread) = inner.thread.as_mut() else {
            return Ok(());
        };

        match thread.stop_thread() {
            Ok(LoopExit::Failed(e)) => {
                self.log
                    .warn(&format!("Capture thread had terminated with an error: {}", e));
                Ok(())
            }
            Ok(exit) => {
                self.log.debug(&format!("Capture thread stopped: {:?}", exit));
                Ok(())
            }
            Err(e) => {
                self.log
                    .error(&format!("Unable to stop capture thread: {}", e));
                Err(e)
            }
        }
    }

    fn common_start_device(
        &self,
        inner: &mut DeviceInner,
        width: u32,
        height: u32,
        pix_fmt: u32,
    ) -> Result<()> {
        let format = PixelFormat::from_fourcc(pix_fmt).map_err(|e| {
            self.log.error(&format!(
                "Unknown pixel format {}",
                fourcc_to_string(pix_fmt)
            ));
            e
        })?;

        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CameraError::invalid_argument(format!(
                "Invalid frame geometry {}x{}",
                width, height
            )));
        }

        let geometry = StreamGeometry::new(width, height, format).map_err(|e| {
            self.log.error(&format!("Unable to size frame buffer: {}", e));
            e
        })?;
        let buffer = FrameBuffer::allocate(width, height, format).map_err(|e| {
            self.log.error("Unable to allocate framebuffer");
            e
        })?;

        self.frames.install(buffer);
        inner.geometry = Some(geometry);

        self.log.debug(&format!(
            "Allocated {} bytes for {} pixels in {}[{}x{}] frame",
            geometry.frame_size,
            geometry.total_pixels(),
            format,
            width,
            height
        ));
        Ok(())
    }

    fn common_stop_device(&self, inner: &mut DeviceInner) {
        inner.geometry = None;
        self.frames.release();
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if inner.state.is_started() {
            if let Err(e) = self.stop_delivering_locked(&mut inner) {
                self.log
                    .warn(&format!("Error stopping frame delivery on teardown: {}", e));
            }
            self.common_stop_device(&mut inner);
        }
        inner.thread.take();
    }
}
