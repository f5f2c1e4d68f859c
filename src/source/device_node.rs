use super::CaptureSource;
use crate::error::{CameraError, Result};
use crate::format::PixelFormat;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// Capture device node using read()-style I/O.
///
/// The node must already be set up by the platform (driver loaded, sensor
/// powered, format negotiated); this source only reads whole frames from it.
/// Any readable file works, which makes recorded raw streams replayable.
pub struct DeviceNodeSource {
    path: PathBuf,
    name: String,
    file: File,
    frame_size: Option<usize>,
}

impl DeviceNodeSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|e| CameraError::io(format!("opening {}", path.display()), e))?;

        Ok(Self {
            name: path.display().to_string(),
            path,
            file,
            frame_size: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureSource for DeviceNodeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(CameraError::invalid_argument(format!(
                "Invalid geometry {}x{} for {}",
                width, height, self.name
            )));
        }
        self.frame_size = Some(format.frame_size(width, height)?);
        Ok(())
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<()> {
        let expected = self
            .frame_size
            .ok_or_else(|| CameraError::invalid_state("read_frame", "unconfigured"))?;
        if buf.len() != expected {
            return Err(CameraError::invalid_argument(format!(
                "Frame buffer of {} bytes does not match negotiated size {}",
                buf.len(),
                expected
            )));
        }

        self.file
            .read_exact(buf)
            .map_err(|e| CameraError::io(format!("reading frame from {}", self.name), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn test_reads_whole_frames_then_fails_at_eof() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let frame_size = PixelFormat::Nv12.frame_size(4, 2).unwrap();
        file.write_all(&vec![5u8; frame_size]).unwrap();
        file.flush().unwrap();

        let mut source = DeviceNodeSource::open(file.path()).unwrap();
        source.configure(4, 2, PixelFormat::Nv12).unwrap();
        assert!(source.readiness_fd().is_some());

        let mut buf = vec![0u8; frame_size];
        source.read_frame(&mut buf).unwrap();
        assert_eq!(buf, vec![5u8; frame_size]);

        let err = source.read_frame(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_read_before_configure_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut source = DeviceNodeSource::open(file.path()).unwrap();
        let mut buf = vec![0u8; 12];
        assert_eq!(
            source.read_frame(&mut buf).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn test_missing_node() {
        let err = DeviceNodeSource::open("/nonexistent/video99").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/nonexistent/video99"));
    }
}
