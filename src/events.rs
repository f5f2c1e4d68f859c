use crossbeam::channel::{Receiver, Sender};
use std::time::SystemTime;

/// Lifecycle notifications emitted by the capture engine.
///
/// Events are sent in causal order: a `PictureCompleted` that releases a
/// waiting stop request is always sent before that request's `StopSent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The capture thread created its control channel and is waiting
    ThreadRunning,
    FrameCaptured { sequence: u64, timestamp: SystemTime },
    PictureStarted,
    /// The still capture finished; `sequence` is `None` if it failed
    PictureCompleted { sequence: Option<u64> },
    /// The stop message is about to be written to the control channel
    StopSent,
    /// The capture loop returned; `clean` is false if it ended on an error
    ThreadExited { clean: bool },
    DeviceStarted { width: u32, height: u32 },
    DeviceStopped,
}

/// Optional event publisher; a missing or disconnected receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    sender: Option<Sender<DeviceEvent>>,
}

impl EventEmitter {
    pub fn new(sender: Sender<DeviceEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Create an emitter together with an unbounded receiver.
    pub fn channel() -> (Self, Receiver<DeviceEvent>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: DeviceEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
