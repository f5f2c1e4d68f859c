use crate::error::{CameraError, Result};
use crate::format::PixelFormat;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Allocate a zeroed byte buffer, reporting allocation failure instead of aborting.
pub(crate) fn allocate_bytes(size: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size).map_err(|e| CameraError::OutOfMemory {
        details: format!("Unable to allocate {} byte frame buffer: {}", size, e),
    })?;
    data.resize(size, 0);
    Ok(data)
}

/// The most recently captured raw frame and its format metadata
#[derive(Debug)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    /// Frames captured since the buffer was allocated; 0 until the first one
    sequence: u64,
    timestamp: Option<SystemTime>,
}

impl FrameBuffer {
    /// Allocate a buffer sized exactly for one frame of the given geometry.
    pub fn allocate(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let data = allocate_bytes(format.frame_size(width, height)?)?;
        Ok(Self {
            width,
            height,
            format,
            data,
            sequence: 0,
            timestamp: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Capture time of the stored frame, `None` before the first capture
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    pub fn has_frame(&self) -> bool {
        self.sequence > 0
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> Option<u64> {
        self.timestamp.map(|ts| {
            SystemTime::now()
                .duration_since(ts)
                .unwrap_or_default()
                .as_millis() as u64
        })
    }

    /// Swap a freshly read frame in, handing the previous bytes back for reuse.
    fn replace(&mut self, incoming: &mut Vec<u8>, timestamp: SystemTime) -> Result<u64> {
        if incoming.len() != self.data.len() {
            return Err(CameraError::invalid_argument(format!(
                "Frame size mismatch: expected {}, got {}",
                self.data.len(),
                incoming.len()
            )));
        }

        std::mem::swap(&mut self.data, incoming);
        self.sequence += 1;
        self.timestamp = Some(timestamp);
        Ok(self.sequence)
    }
}

/// Shared holder for the device's single [`FrameBuffer`].
///
/// Writers and readers are serialised by one mutex. The capture loop reads
/// hardware bytes into its own scratch vector and only takes the lock to swap
/// them in, so readers see either the previous or the new frame, never a mix.
pub struct FrameStore {
    slot: Mutex<Option<FrameBuffer>>,
    arrived: Condvar,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            arrived: Condvar::new(),
        }
    }

    /// Install a newly allocated buffer, replacing any previous one.
    pub fn install(&self, buffer: FrameBuffer) {
        *self.slot.lock() = Some(buffer);
    }

    /// Release the buffer, waking anyone waiting for a frame.
    pub fn release(&self) -> Option<FrameBuffer> {
        let released = self.slot.lock().take();
        self.arrived.notify_all();
        released
    }

    pub fn is_allocated(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Declared size of the installed buffer
    pub fn frame_size(&self) -> Option<usize> {
        self.slot.lock().as_ref().map(FrameBuffer::size)
    }

    /// Sequence number of the latest stored frame (0 when none).
    pub fn latest_sequence(&self) -> u64 {
        self.slot.lock().as_ref().map_or(0, FrameBuffer::sequence)
    }

    /// Publish a new frame; `incoming` receives the previous bytes.
    pub fn publish(&self, incoming: &mut Vec<u8>, timestamp: SystemTime) -> Result<u64> {
        let sequence = {
            let mut slot = self.slot.lock();
            let buffer = slot
                .as_mut()
                .ok_or_else(|| CameraError::invalid_state("publish frame", "released"))?;
            buffer.replace(incoming, timestamp)?
        };
        self.arrived.notify_all();
        Ok(sequence)
    }

    /// Run `f` against the current buffer while holding the lock.
    pub fn with_frame<R>(&self, f: impl FnOnce(&FrameBuffer) -> R) -> Option<R> {
        self.slot.lock().as_ref().map(f)
    }

    /// Block until a frame newer than `after` is stored.
    ///
    /// Returns the new sequence number, or `None` on timeout or when the
    /// buffer is released while waiting.
    pub fn wait_for_frame_after(&self, after: u64, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();

        loop {
            match slot.as_ref() {
                None => return None,
                Some(buffer) if buffer.sequence() > after => return Some(buffer.sequence()),
                Some(_) => {}
            }

            if self.arrived.wait_until(&mut slot, deadline).timed_out() {
                return slot
                    .as_ref()
                    .map(FrameBuffer::sequence)
                    .filter(|&seq| seq > after);
            }
        }
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_allocate_exact_size() {
        let buffer = FrameBuffer::allocate(640, 480, PixelFormat::Nv12).unwrap();
        assert_eq!(buffer.size(), 460_800);
        assert_eq!(buffer.sequence(), 0);
        assert!(!buffer.has_frame());
        assert!(buffer.timestamp().is_none());
        assert!(buffer.age_ms().is_none());
    }

    #[test]
    fn test_publish_swaps_and_counts() {
        let store = FrameStore::new();
        store.install(FrameBuffer::allocate(4, 2, PixelFormat::Nv21).unwrap());

        let mut incoming = vec![7u8; 12];
        let seq = store.publish(&mut incoming, SystemTime::now()).unwrap();

        assert_eq!(seq, 1);
        // previous (zeroed) bytes are handed back for reuse
        assert_eq!(incoming, vec![0u8; 12]);
        assert_eq!(store.with_frame(|f| f.data().to_vec()).unwrap(), vec![7u8; 12]);
        assert_eq!(store.latest_sequence(), 1);
    }

    #[test]
    fn test_publish_rejects_wrong_size() {
        let store = FrameStore::new();
        store.install(FrameBuffer::allocate(4, 2, PixelFormat::Nv21).unwrap());

        let mut incoming = vec![1u8; 5];
        assert!(store.publish(&mut incoming, SystemTime::now()).is_err());
        assert_eq!(store.latest_sequence(), 0);
        assert_eq!(store.frame_size(), Some(12));
    }

    #[test]
    fn test_publish_without_buffer_fails() {
        let store = FrameStore::new();
        let mut incoming = vec![0u8; 12];
        assert!(store.publish(&mut incoming, SystemTime::now()).is_err());
    }

    #[test]
    fn test_wait_for_frame_after() {
        let store = Arc::new(FrameStore::new());
        store.install(FrameBuffer::allocate(4, 2, PixelFormat::Nv12).unwrap());

        assert_eq!(store.wait_for_frame_after(0, Duration::from_millis(10)), None);

        let writer = Arc::clone(&store);
        let handle = thread::spawn(move || {
            let mut incoming = vec![3u8; 12];
            writer.publish(&mut incoming, SystemTime::now()).unwrap();
        });

        assert_eq!(store.wait_for_frame_after(0, Duration::from_secs(5)), Some(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_readers_never_observe_torn_frames() {
        let store = Arc::new(FrameStore::new());
        store.install(FrameBuffer::allocate(64, 64, PixelFormat::Nv12).unwrap());
        let size = PixelFormat::Nv12.frame_size(64, 64).unwrap();

        let writer = Arc::clone(&store);
        let handle = thread::spawn(move || {
            let mut scratch = vec![0u8; size];
            for value in 1..=200u8 {
                scratch.iter_mut().for_each(|b| *b = value);
                writer.publish(&mut scratch, SystemTime::now()).unwrap();
            }
        });

        for _ in 0..500 {
            let uniform = store
                .with_frame(|f| {
                    let first = f.data()[0];
                    f.data().iter().all(|&b| b == first)
                })
                .unwrap();
            assert!(uniform);
        }

        handle.join().unwrap();
        assert_eq!(store.latest_sequence(), 200);
    }

    #[test]
    fn test_release_wakes_waiters() {
        let store = Arc::new(FrameStore::new());
        store.install(FrameBuffer::allocate(4, 2, PixelFormat::Nv12).unwrap());

        let releaser = Arc::clone(&store);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            releaser.release()
        });

        assert_eq!(store.wait_for_frame_after(0, Duration::from_secs(5)), None);
        assert!(handle.join().unwrap().is_some());
        assert!(!store.is_allocated());
    }
}
