use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A value guarded by a lock and a condition variable.
///
/// Cross-thread flags such as "a still picture is in flight" or "the capture
/// thread is listening" are published through `set` and awaited through
/// `wait_while`; nobody reads or writes the value without the lock.
#[derive(Debug)]
pub struct Gate<T> {
    value: Mutex<T>,
    changed: Condvar,
}

impl<T: Copy + PartialEq> Gate<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> T {
        *self.value.lock()
    }

    /// Store a new value and wake every waiter.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
        self.changed.notify_all();
    }

    /// Store `to` only if the current value is `from`. Returns whether it did.
    pub fn transition(&self, from: T, to: T) -> bool {
        let mut current = self.value.lock();
        if *current != from {
            return false;
        }
        *current = to;
        drop(current);
        self.changed.notify_all();
        true
    }

    /// Block while `pred` holds, returning the value that released the wait.
    pub fn wait_while(&self, mut pred: impl FnMut(&T) -> bool) -> T {
        let mut value = self.value.lock();
        while pred(&*value) {
            self.changed.wait(&mut value);
        }
        *value
    }

    /// Like [`Gate::wait_while`] but gives up after `timeout`, returning `None`.
    pub fn wait_while_for(&self, mut pred: impl FnMut(&T) -> bool, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut value = self.value.lock();
        while pred(&*value) {
            if self.changed.wait_until(&mut value, deadline).timed_out() && pred(&*value) {
                return None;
            }
        }
        Some(*value)
    }
}

impl<T: Copy + PartialEq + Default> Default for Gate<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_wakes_waiter() {
        let gate = Arc::new(Gate::new(false));
        let setter = Arc::clone(&gate);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.set(true);
        });

        assert!(gate.wait_while(|running| !*running));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_returns_immediately_when_released() {
        let gate = Gate::new(3u32);
        assert_eq!(gate.wait_while(|v| *v == 0), 3);
    }

    #[test]
    fn test_wait_times_out() {
        let gate = Gate::new(true);
        assert_eq!(gate.wait_while_for(|busy| *busy, Duration::from_millis(10)), None);
    }

    #[test]
    fn test_transition_is_conditional() {
        let gate = Gate::new(false);
        assert!(gate.transition(false, true));
        assert!(!gate.transition(false, true));
        assert!(gate.get());
    }
}
