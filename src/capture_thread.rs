use crate::control::{self, ControlChannel, ControlMessage, WaitOutcome};
use crate::error::{CameraError, Result};
use crate::events::{DeviceEvent, EventEmitter};
use crate::frame::{allocate_bytes, FrameStore};
use crate::gate::Gate;
use crate::logging::LogSink;
use crate::source::CaptureSource;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// Where the capture thread is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPhase {
    /// No thread has been started since the last stop
    Idle,
    /// Spawned but not yet listening on its control channel
    Starting,
    /// Inside the wait loop; a stop request will be seen
    Running,
    /// The loop has returned and the thread is about to finish
    Exited,
}

/// How the capture loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// A `Stop` message was received
    Stopped,
    /// Single-shot mode delivered its frame
    SingleShotComplete,
    Failed(CameraError),
}

impl LoopExit {
    pub fn is_clean(&self) -> bool {
        !matches!(self, LoopExit::Failed(_))
    }
}

/// Shared state the capture loop works on.
#[derive(Clone)]
pub struct LoopContext {
    pub source: Arc<Mutex<Box<dyn CaptureSource>>>,
    pub frames: Arc<FrameStore>,
    /// Optional wait timeout; `None` blocks until something is ready
    pub poll_timeout: Option<Duration>,
}

/// Holder for the thread's control channel.
///
/// The capture thread opens the channel in `prepare` and the controller
/// closes it once the thread has been joined.
#[derive(Default)]
struct ControlSlot {
    channel: Mutex<Option<Arc<ControlChannel>>>,
}

impl ControlSlot {
    fn prepare(&self, log: &dyn LogSink) -> Result<Arc<ControlChannel>> {
        let mut slot = self.channel.lock();
        if slot.is_some() {
            log.warn("Thread control channel is already open");
            return Err(CameraError::invalid_state(
                "prepare",
                "holding an open control channel",
            ));
        }

        let channel = Arc::new(ControlChannel::open()?);
        *slot = Some(Arc::clone(&channel));
        Ok(channel)
    }

    fn current(&self) -> Option<Arc<ControlChannel>> {
        self.channel.lock().clone()
    }

    fn close(&self) {
        self.channel.lock().take();
    }
}

/// Dedicated capture thread and its control channel.
pub struct CaptureThread {
    control: Arc<ControlSlot>,
    handle: Option<JoinHandle<LoopExit>>,
    phase: Arc<Gate<ThreadPhase>>,
    log: Arc<dyn LogSink>,
    events: EventEmitter,
}

impl CaptureThread {
    pub fn new(phase: Arc<Gate<ThreadPhase>>, log: Arc<dyn LogSink>, events: EventEmitter) -> Self {
        Self {
            control: Arc::new(ControlSlot::default()),
            handle: None,
            phase,
            log,
            events,
        }
    }

    /// Open the control channel.
    ///
    /// Normally run by the capture thread itself before it starts waiting.
    /// Refuses to replace a channel that is still open.
    pub fn prepare(&self) -> Result<()> {
        self.control.prepare(self.log.as_ref()).map(|_| ())
    }

    /// Whether a thread has been started and not yet collected by `stop_thread`
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether the started thread has left its loop on its own.
    ///
    /// True from the moment the loop publishes `Exited`, which may be shortly
    /// before the OS thread itself has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(false, |handle| {
            handle.is_finished() || self.phase.get() == ThreadPhase::Exited
        })
    }

    /// Whether a started thread is still capturing frames
    pub fn is_delivering(&self) -> bool {
        self.is_active() && !self.is_finished()
    }

    pub fn has_control_channel(&self) -> bool {
        self.control.current().is_some()
    }

    /// Spawn the capture loop. `one_burst` stops it after one frame.
    pub fn start_thread(&mut self, one_burst: bool, ctx: LoopContext) -> Result<()> {
        if self.handle.is_some() {
            return Err(CameraError::invalid_state("start_thread", "running"));
        }

        let control = Arc::clone(&self.control);
        let phase = Arc::clone(&self.phase);
        let log = Arc::clone(&self.log);
        let events = self.events.clone();

        self.phase.set(ThreadPhase::Starting);

        let handle = thread::Builder::new()
            .name("camdev-capture".to_string())
            .spawn(move || thread_main(&control, &phase, log.as_ref(), &events, &ctx, one_burst))
            .map_err(|e| {
                self.phase.set(ThreadPhase::Idle);
                CameraError::ResourceExhausted {
                    details: "Unable to spawn capture thread".to_string(),
                    source: e,
                }
            })?;

        self.handle = Some(handle);
        self.log.debug(&format!(
            "Capture thread started ({})",
            if one_burst { "single-shot" } else { "continuous" }
        ));
        Ok(())
    }

    /// Send `Stop`, wait for the thread to finish and close the channel.
    ///
    /// Returns how the loop ended. On a failed send the thread is left
    /// untouched so the call can be retried.
    pub fn stop_thread(&mut self) -> Result<LoopExit> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| CameraError::invalid_state("stop_thread", "not running"))?;

        match self.control.current() {
            Some(channel) => {
                self.events.emit(DeviceEvent::StopSent);
                if let Err(e) = channel.send(ControlMessage::Stop) {
                    self.log
                        .error(&format!("Unable to send stop message to capture thread: {}", e));
                    self.handle = Some(handle);
                    return Err(e);
                }
            }
            None if handle.is_finished() || self.phase.get() == ThreadPhase::Exited => {
                self.log
                    .debug("Capture thread exited before opening its control channel");
            }
            None => {
                self.log.error("Thread control channel is not open");
                self.handle = Some(handle);
                return Err(CameraError::invalid_state(
                    "stop_thread",
                    "not yet listening for control messages",
                ));
            }
        }

        let exit = handle.join().map_err(|panic| {
            let details = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            self.log
                .error(&format!("Capture thread panicked: {}", details));
            CameraError::ThreadPanicked { details }
        });

        self.control.close();
        self.phase.set(ThreadPhase::Idle);

        let exit = exit?;
        self.log.debug(&format!("Capture thread stopped: {:?}", exit));
        Ok(exit)
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.phase.wait_while(|p| *p == ThreadPhase::Starting);
            if let Err(e) = self.stop_thread() {
                self.log
                    .warn(&format!("Capture thread could not be stopped on drop: {}", e));
            }
        }
    }
}

fn thread_main(
    control: &ControlSlot,
    phase: &Gate<ThreadPhase>,
    log: &dyn LogSink,
    events: &EventEmitter,
    ctx: &LoopContext,
    one_burst: bool,
) -> LoopExit {
    let channel = match control.prepare(log) {
        Ok(channel) => channel,
        Err(e) => {
            log.error(&format!("Capture thread could not prepare: {}", e));
            phase.set(ThreadPhase::Exited);
            events.emit(DeviceEvent::ThreadExited { clean: false });
            return LoopExit::Failed(e);
        }
    };

    phase.set(ThreadPhase::Running);
    events.emit(DeviceEvent::ThreadRunning);

    let exit = run_loop(&channel, ctx, one_burst, log, events);

    phase.set(ThreadPhase::Exited);
    events.emit(DeviceEvent::ThreadExited {
        clean: exit.is_clean(),
    });
    exit
}

fn run_loop(
    channel: &ControlChannel,
    ctx: &LoopContext,
    one_burst: bool,
    log: &dyn LogSink,
    events: &EventEmitter,
) -> LoopExit {
    let Some(frame_size) = ctx.frames.frame_size() else {
        log.error("Capture loop started without a frame buffer");
        return LoopExit::Failed(CameraError::invalid_state("capture loop", "released"));
    };
    let mut scratch = match allocate_bytes(frame_size) {
        Ok(scratch) => scratch,
        Err(e) => return LoopExit::Failed(e),
    };

    let (source_fd, source_name) = {
        let source = ctx.source.lock();
        (source.readiness_fd(), source.name().to_string())
    };

    loop {
        let outcome = match control::wait(channel, source_fd, ctx.poll_timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                log.error(&format!("Capture wait failed: {}", e));
                return LoopExit::Failed(e);
            }
        };

        match outcome {
            WaitOutcome::Exit => {
                log.debug("Stop message received");
                return LoopExit::Stopped;
            }
            WaitOutcome::Timeout if source_fd.is_some() => continue,
            WaitOutcome::Timeout | WaitOutcome::SourceReady => {}
        }

        if let Err(e) = ctx.source.lock().read_frame(&mut scratch) {
            log.error(&format!("Unable to read frame from {}: {}", source_name, e));
            return LoopExit::Failed(e);
        }

        let timestamp = SystemTime::now();
        match ctx.frames.publish(&mut scratch, timestamp) {
            Ok(sequence) => {
                log.trace(&format!("Captured frame {} from {}", sequence, source_name));
                events.emit(DeviceEvent::FrameCaptured {
                    sequence,
                    timestamp,
                });
            }
            Err(e) => {
                log.error(&format!("Unable to store captured frame: {}", e));
                return LoopExit::Failed(e);
            }
        }

        if one_burst {
            log.debug("Single-shot frame delivered, leaving capture loop");
            return LoopExit::SingleShotComplete;
        }
    }
}
