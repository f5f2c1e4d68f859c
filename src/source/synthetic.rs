use super::CaptureSource;
use crate::control::retry_eintr;
use crate::error::{CameraError, Result};
use crate::format::PixelFormat;
use crossbeam::channel::{Receiver, Sender, TryRecvError};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

enum Mode {
    /// Frames are injected through a [`SyntheticFeed`]; the socket is rung once per frame
    Fed {
        frames: Receiver<Vec<u8>>,
        bell: UnixStream,
    },
    /// A test pattern is produced each time the periodic timer expires
    FreeRunning { timer: OwnedFd, counter: u64 },
}

/// Virtual capture source.
///
/// Readiness is a real descriptor (a socket pair or a timerfd) so the capture
/// loop waits on it exactly like on hardware, and a stop request is never
/// held up by the source's pacing.
pub struct SyntheticSource {
    name: String,
    mode: Mode,
    geometry: Option<(u32, u32, PixelFormat)>,
}

/// Producer handle for a fed [`SyntheticSource`]
#[derive(Clone)]
pub struct SyntheticFeed {
    frames: Sender<Vec<u8>>,
    bell: Arc<UnixStream>,
}

fn socket_pair() -> Result<(UnixStream, UnixStream)> {
    UnixStream::pair().map_err(|e| CameraError::ResourceExhausted {
        details: "Unable to create synthetic source socket pair".to_string(),
        source: e,
    })
}

/// Periodic timerfd that first expires immediately, then every `interval`.
fn interval_timer(interval: Duration) -> Result<OwnedFd> {
    // SAFETY: no pointer arguments.
    let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC) };
    if fd < 0 {
        return Err(CameraError::ResourceExhausted {
            details: "Unable to create synthetic source timer".to_string(),
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: timerfd_create returned a fresh descriptor nobody else owns.
    let timer = unsafe { OwnedFd::from_raw_fd(fd) };

    // a zero interval would disarm the timer after its first expiry
    let interval = interval.max(Duration::from_nanos(1));
    let spec = libc::itimerspec {
        it_interval: libc::timespec {
            tv_sec: interval.as_secs() as _,
            tv_nsec: interval.subsec_nanos() as _,
        },
        it_value: libc::timespec {
            tv_sec: 0,
            tv_nsec: 1,
        },
    };

    // SAFETY: `spec` is a valid itimerspec; the previous value is not requested.
    let res = unsafe { libc::timerfd_settime(timer.as_raw_fd(), 0, &spec, std::ptr::null_mut()) };
    if res != 0 {
        return Err(CameraError::io(
            "arming synthetic source timer",
            io::Error::last_os_error(),
        ));
    }
    Ok(timer)
}

impl SyntheticSource {
    /// Create a source whose frames are pushed through the returned feed.
    pub fn new() -> Result<(Self, SyntheticFeed)> {
        let (bell, bell_writer) = socket_pair()?;
        let (tx, rx) = crossbeam::channel::unbounded();

        let source = Self {
            name: "synthetic-fed".to_string(),
            mode: Mode::Fed { frames: rx, bell },
            geometry: None,
        };
        let feed = SyntheticFeed {
            frames: tx,
            bell: Arc::new(bell_writer),
        };
        Ok((source, feed))
    }

    /// Create a source that produces a moving test pattern every `interval`.
    ///
    /// The first frame is ready immediately.
    pub fn free_running(interval: Duration) -> Result<Self> {
        Ok(Self {
            name: "synthetic".to_string(),
            mode: Mode::FreeRunning {
                timer: interval_timer(interval)?,
                counter: 0,
            },
            geometry: None,
        })
    }

    /// Deterministic 4:2:0 test frame.
    ///
    /// Luma is a diagonal ramp shifted by `seed`; chroma sample `k` has
    /// U = 0x10 + k and V = 0x80 + k (both wrapping), laid out per `format`.
    pub fn test_pattern(width: u32, height: u32, format: PixelFormat, seed: u8) -> Vec<u8> {
        let samples = (width / 2) as usize * (height / 2) as usize;
        let mut frame = Vec::with_capacity(format.frame_size(width, height).unwrap_or_default());

        for y in 0..height {
            for x in 0..width {
                frame.push((x.wrapping_add(y) as u8).wrapping_add(seed));
            }
        }

        let u = |k: usize| 0x10u8.wrapping_add(k as u8);
        let v = |k: usize| 0x80u8.wrapping_add(k as u8);

        match format {
            PixelFormat::Nv12 => (0..samples).for_each(|k| frame.extend_from_slice(&[u(k), v(k)])),
            PixelFormat::Nv21 => (0..samples).for_each(|k| frame.extend_from_slice(&[v(k), u(k)])),
            PixelFormat::Yuv420 => {
                frame.extend((0..samples).map(u));
                frame.extend((0..samples).map(v));
            }
            PixelFormat::Yvu420 => {
                frame.extend((0..samples).map(v));
                frame.extend((0..samples).map(u));
            }
        }

        frame
    }

    fn expect_geometry(&self) -> Result<(u32, u32, PixelFormat)> {
        self.geometry
            .ok_or_else(|| CameraError::invalid_state("read_frame", "unconfigured"))
    }
}

impl SyntheticFeed {
    /// Queue one frame and signal readiness.
    pub fn push(&self, frame: Vec<u8>) -> Result<()> {
        self.frames.send(frame).map_err(|_| {
            CameraError::io(
                "pushing synthetic frame",
                io::Error::new(io::ErrorKind::BrokenPipe, "synthetic source dropped"),
            )
        })?;
        (&*self.bell)
            .write_all(&[1])
            .map_err(|e| CameraError::io("signalling synthetic frame", e))
    }

    /// Frames queued but not yet read by the source
    pub fn pending(&self) -> usize {
        self.frames.len()
    }
}

impl CaptureSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(CameraError::invalid_argument(format!(
                "Invalid geometry {}x{}",
                width, height
            )));
        }
        self.geometry = Some((width, height, format));
        Ok(())
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        match &self.mode {
            Mode::Fed { bell, .. } => Some(bell.as_raw_fd()),
            Mode::FreeRunning { timer, .. } => Some(timer.as_raw_fd()),
        }
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<()> {
        let (width, height, format) = self.expect_geometry()?;

        match &mut self.mode {
            Mode::Fed { frames, bell } => {
                let mut token = [0u8; 1];
                (&*bell)
                    .read_exact(&mut token)
                    .map_err(|e| CameraError::io("waiting for synthetic frame", e))?;

                let frame = match frames.try_recv() {
                    Ok(frame) => frame,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                        return Err(CameraError::io(
                            "reading synthetic frame",
                            io::Error::new(io::ErrorKind::UnexpectedEof, "no frame queued"),
                        ))
                    }
                };

                if frame.len() != buf.len() {
                    return Err(CameraError::io(
                        "reading synthetic frame",
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("frame has {} bytes, expected {}", frame.len(), buf.len()),
                        ),
                    ));
                }
                buf.copy_from_slice(&frame);
            }
            Mode::FreeRunning { timer, counter } => {
                // consume the expiration count; only blocks if called before the timer is ready
                let mut expirations = [0u8; 8];
                let fd = timer.as_raw_fd();
                // SAFETY: `expirations` is the 8 byte buffer timerfd reads require.
                retry_eintr(|| unsafe {
                    libc::read(fd, expirations.as_mut_ptr() as *mut libc::c_void, expirations.len())
                })
                .map_err(|e| CameraError::io("reading synthetic source timer", e))?;

                let frame = Self::test_pattern(width, height, format, *counter as u8);
                if frame.len() != buf.len() {
                    return Err(CameraError::invalid_argument(format!(
                        "Frame buffer of {} bytes does not match negotiated size {}",
                        buf.len(),
                        frame.len()
                    )));
                }
                buf.copy_from_slice(&frame);
                *counter += 1;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_pattern_layouts() {
        let nv12 = SyntheticSource::test_pattern(4, 2, PixelFormat::Nv12, 0);
        let nv21 = SyntheticSource::test_pattern(4, 2, PixelFormat::Nv21, 0);
        let i420 = SyntheticSource::test_pattern(4, 2, PixelFormat::Yuv420, 0);

        assert_eq!(nv12.len(), 12);
        assert_eq!(&nv12[..4], &[0, 1, 2, 3]);
        assert_eq!(&nv12[8..], &[0x10, 0x80, 0x11, 0x81]);
        assert_eq!(&nv21[8..], &[0x80, 0x10, 0x81, 0x11]);
        assert_eq!(&i420[8..], &[0x10, 0x11, 0x80, 0x81]);
    }

    #[test]
    fn test_fed_source_delivers_pushed_frames() {
        let (mut source, feed) = SyntheticSource::new().unwrap();
        source.configure(4, 2, PixelFormat::Nv12).unwrap();

        let frame = SyntheticSource::test_pattern(4, 2, PixelFormat::Nv12, 9);
        feed.push(frame.clone()).unwrap();
        assert_eq!(feed.pending(), 1);

        let mut buf = vec![0u8; 12];
        source.read_frame(&mut buf).unwrap();
        assert_eq!(buf, frame);
        assert_eq!(feed.pending(), 0);
    }

    #[test]
    fn test_wrong_sized_frame_is_io_error() {
        let (mut source, feed) = SyntheticSource::new().unwrap();
        source.configure(4, 2, PixelFormat::Nv12).unwrap();
        feed.push(vec![0u8; 3]).unwrap();

        let mut buf = vec![0u8; 12];
        assert_eq!(source.read_frame(&mut buf).unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_free_running_source_advances_pattern() {
        let mut source = SyntheticSource::free_running(Duration::from_millis(1)).unwrap();
        source.configure(4, 2, PixelFormat::Nv21).unwrap();

        let mut first = vec![0u8; 12];
        let mut second = vec![0u8; 12];
        source.read_frame(&mut first).unwrap();
        source.read_frame(&mut second).unwrap();

        assert_eq!(first[0], 0);
        assert_eq!(second[0], 1);
    }

    #[test]
    fn test_free_running_readiness_follows_interval() {
        use crate::control::{wait, ControlChannel, WaitOutcome};

        let mut source = SyntheticSource::free_running(Duration::from_secs(10)).unwrap();
        source.configure(4, 2, PixelFormat::Nv12).unwrap();
        let channel = ControlChannel::open().unwrap();
        let fd = source.readiness_fd();

        assert_eq!(
            wait(&channel, fd, Some(Duration::from_secs(1))).unwrap(),
            WaitOutcome::SourceReady
        );
        let mut buf = vec![0u8; 12];
        source.read_frame(&mut buf).unwrap();

        // next frame is not due for another interval
        assert_eq!(
            wait(&channel, fd, Some(Duration::from_millis(30))).unwrap(),
            WaitOutcome::Timeout
        );
    }
}
