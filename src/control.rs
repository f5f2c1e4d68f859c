//! Self-signalling control channel used to interrupt the capture loop's wait.
//!
//! A pipe carries fixed-size [`ControlMessage`] values from the controller to
//! the capture thread. The capture thread multiplexes the pipe's read end with
//! the capture source's readiness handle in [`wait`], so a stop request wakes
//! it even while it is blocked waiting for hardware.

use crate::error::{CameraError, Result};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

const MESSAGE_SIZE: usize = std::mem::size_of::<u32>();

/// Discrete messages understood by the capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ControlMessage {
    Stop = 1,
}

impl ControlMessage {
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            1 => Ok(ControlMessage::Stop),
            other => Err(CameraError::protocol(format!(
                "Unknown capture thread message {}",
                other
            ))),
        }
    }
}

/// Result of one [`wait`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The capture source has a frame ready
    SourceReady,
    /// Nothing became ready before the timeout elapsed
    Timeout,
    /// A `Stop` message was received
    Exit,
}

/// Run a raw syscall wrapper, retrying while it fails with `EINTR`.
pub(crate) fn retry_eintr<F: FnMut() -> isize>(mut call: F) -> io::Result<usize> {
    loop {
        let res = call();
        if res >= 0 {
            return Ok(res as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Unidirectional pipe: the controller writes, the capture thread reads.
#[derive(Debug)]
pub struct ControlChannel {
    read_end: OwnedFd,
    write_end: OwnedFd,
}

impl ControlChannel {
    /// Create a new channel.
    ///
    /// Fails with `ResourceExhausted` when the OS refuses another pipe.
    pub fn open() -> Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1; 2];

        // SAFETY: `fds` is a valid two element array for pipe2(2) to fill.
        let res = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        if res != 0 {
            return Err(CameraError::ResourceExhausted {
                details: "Unable to create thread control pipe".to_string(),
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: pipe2(2) succeeded, both descriptors are open and owned by us.
        let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        Ok(Self { read_end, write_end })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_end.as_raw_fd()
    }

    /// Write one message to the channel.
    pub fn send(&self, message: ControlMessage) -> Result<()> {
        self.send_raw(message.to_wire())
    }

    pub(crate) fn send_raw(&self, value: u32) -> Result<()> {
        let bytes = value.to_ne_bytes();
        let fd = self.write_end.as_raw_fd();

        // SAFETY: `bytes` outlives the call and its length is passed along.
        let written = retry_eintr(|| unsafe {
            libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len())
        })
        .map_err(|e| CameraError::io("sending control message", e))?;

        if written != MESSAGE_SIZE {
            return Err(CameraError::io(
                "sending control message",
                io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("wrote {} of {} bytes", written, MESSAGE_SIZE),
                ),
            ));
        }
        Ok(())
    }

    /// Read one message, blocking until it arrives.
    pub fn recv(&self) -> Result<ControlMessage> {
        let mut bytes = [0u8; MESSAGE_SIZE];
        let fd = self.read_end.as_raw_fd();

        // SAFETY: `bytes` is writable for its full length during the call.
        let read = retry_eintr(|| unsafe {
            libc::read(fd, bytes.as_mut_ptr() as *mut libc::c_void, bytes.len())
        })
        .map_err(|e| CameraError::io("reading control message", e))?;

        if read != MESSAGE_SIZE {
            return Err(CameraError::io(
                "reading control message",
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("unexpected message size {}", read),
                ),
            ));
        }

        ControlMessage::from_wire(u32::from_ne_bytes(bytes))
    }
}

fn timeval_from(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}

fn check_selectable(fd: RawFd) -> Result<()> {
    if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
        return Err(CameraError::invalid_argument(format!(
            "Descriptor {} cannot be waited on",
            fd
        )));
    }
    Ok(())
}

/// Block until the capture source is readable, a control message arrives or
/// `timeout` elapses. `None` waits indefinitely.
///
/// The control channel is checked first; anything other than `Stop` on it is
/// a protocol error. Interrupted waits are retried with the remaining time.
pub fn wait(
    channel: &ControlChannel,
    source_fd: Option<RawFd>,
    timeout: Option<Duration>,
) -> Result<WaitOutcome> {
    let control_fd = channel.read_fd();
    check_selectable(control_fd)?;
    if let Some(fd) = source_fd {
        check_selectable(fd)?;
    }

    let nfds = source_fd.map_or(control_fd, |fd| fd.max(control_fd)) + 1;
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        let mut read_set = MaybeUninit::<libc::fd_set>::uninit();
        // SAFETY: FD_ZERO initialises the set before any other use; both
        // descriptors were checked to be below FD_SETSIZE.
        let mut read_set = unsafe {
            libc::FD_ZERO(read_set.as_mut_ptr());
            let mut set = read_set.assume_init();
            libc::FD_SET(control_fd, &mut set);
            if let Some(fd) = source_fd {
                libc::FD_SET(fd, &mut set);
            }
            set
        };

        let mut tv = deadline.map(|d| timeval_from(d.saturating_duration_since(Instant::now())));
        let tvp = tv
            .as_mut()
            .map_or(std::ptr::null_mut(), |tv| tv as *mut libc::timeval);

        // SAFETY: all pointers reference live locals for the duration of the call.
        let res = unsafe {
            libc::select(
                nfds,
                &mut read_set,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                tvp,
            )
        };

        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(CameraError::io("waiting for capture events", err));
        }
        if res == 0 {
            return Ok(WaitOutcome::Timeout);
        }

        // SAFETY: read_set was filled in by select above.
        if unsafe { libc::FD_ISSET(control_fd, &read_set) } {
            return match channel.recv()? {
                ControlMessage::Stop => Ok(WaitOutcome::Exit),
            };
        }

        return Ok(WaitOutcome::SourceReady);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_message_wire_values() {
        assert_eq!(ControlMessage::Stop.to_wire(), 1);
        assert_eq!(ControlMessage::from_wire(1).unwrap(), ControlMessage::Stop);
        assert_eq!(
            ControlMessage::from_wire(42).unwrap_err().kind(),
            ErrorKind::Protocol
        );
    }

    #[test]
    fn test_channel_descriptors_are_close_on_exec() {
        let channel = ControlChannel::open().unwrap();
        for fd in [channel.read_end.as_raw_fd(), channel.write_end.as_raw_fd()] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert!(flags >= 0);
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }
    }

    #[test]
    fn test_send_and_recv() {
        let channel = ControlChannel::open().unwrap();
        channel.send(ControlMessage::Stop).unwrap();
        assert_eq!(channel.recv().unwrap(), ControlMessage::Stop);
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let channel = ControlChannel::open().unwrap();
        let outcome = wait(&channel, None, Some(Duration::from_micros(1500))).unwrap();
        assert_eq!(outcome, WaitOutcome::Timeout);
    }

    #[test]
    fn test_stop_interrupts_blocking_wait() {
        let channel = Arc::new(ControlChannel::open().unwrap());
        let waiter = Arc::clone(&channel);

        let handle = thread::spawn(move || wait(&waiter, None, None));
        thread::sleep(Duration::from_millis(20));
        channel.send(ControlMessage::Stop).unwrap();

        assert_eq!(handle.join().unwrap().unwrap(), WaitOutcome::Exit);
    }

    #[test]
    fn test_source_readiness_is_reported() {
        let channel = ControlChannel::open().unwrap();
        let source = ControlChannel::open().unwrap();
        source.send_raw(0xdead_beef).unwrap();

        let outcome = wait(&channel, Some(source.read_fd()), Some(Duration::from_secs(1))).unwrap();
        assert_eq!(outcome, WaitOutcome::SourceReady);
    }

    #[test]
    fn test_control_takes_priority_over_source() {
        let channel = ControlChannel::open().unwrap();
        let source = ControlChannel::open().unwrap();
        source.send_raw(7).unwrap();
        channel.send(ControlMessage::Stop).unwrap();

        let outcome = wait(&channel, Some(source.read_fd()), None).unwrap();
        assert_eq!(outcome, WaitOutcome::Exit);
    }

    #[test]
    fn test_unknown_control_message_is_protocol_error() {
        let channel = ControlChannel::open().unwrap();
        channel.send_raw(99).unwrap();

        let err = wait(&channel, None, Some(Duration::from_secs(1))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
