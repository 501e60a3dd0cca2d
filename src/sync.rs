//! # Synchronization Primitives
//!
//! Two primitives guard the shared state of a run:
//!
//! - [`critical_section`]: a short, non-blocking-in-practice exclusive
//!   section used for the error register. Backed by the `critical-section`
//!   crate, so the same code runs on a host (`std` implementation) or on a
//!   single-core target that disables interrupts.
//! - [`BinarySemaphore`]: the flip semaphore. Unlike a mutex guard, it can
//!   be acquired in one call (`schedule`) and released in another
//!   (`acknowledge`), which is what lets one step's critical section span
//!   two entry points.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::SyncError;

pub use critical_section::CriticalSection;

/// Execute a closure within a critical section.
///
/// All reads and writes of the error register go through here so a fatal
/// message and its stop flag are always observed together.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
///
/// Keep critical sections as short as possible: they must never wrap a
/// parameter copy or the step function.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Wait bound for [`BinarySemaphore::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the semaphore is released or closed.
    Infinite,
    /// Give up after the given number of milliseconds.
    Millis(u64),
}

impl Timeout {
    fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(Instant::now() + Duration::from_millis(ms)),
        }
    }
}

// ---------------------------------------------------------------------------
// Binary semaphore
// ---------------------------------------------------------------------------

/// A binary wait/signal primitive provided by the host platform.
///
/// Acquisition is fallible: a timeout or a closed semaphore returns
/// [`SyncError`], and callers decide how fatal that is.
pub trait BinarySemaphore: Send + Sync {
    /// Take the semaphore, waiting at most `timeout`.
    fn acquire(&self, timeout: Timeout) -> Result<(), SyncError>;

    /// Give the semaphore back. Releasing an already-available binary
    /// semaphore leaves it available (the count saturates at one).
    fn release(&self);

    /// Tear the semaphore down. Pending and future acquisitions fail with
    /// [`SyncError::Closed`].
    fn close(&self) {}
}

#[derive(Debug)]
struct SemState {
    available: bool,
    closed: bool,
}

/// [`BinarySemaphore`] for hosted targets, built on `parking_lot`.
#[derive(Debug)]
pub struct HostSemaphore {
    state: Mutex<SemState>,
    cond: Condvar,
}

impl HostSemaphore {
    /// Create a semaphore that starts available (initial count 1).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SemState {
                available: true,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Whether the semaphore can currently be taken without waiting.
    pub fn is_available(&self) -> bool {
        let state = self.state.lock();
        state.available && !state.closed
    }
}

impl Default for HostSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySemaphore for HostSemaphore {
    fn acquire(&self, timeout: Timeout) -> Result<(), SyncError> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(SyncError::Closed);
            }
            if state.available {
                state.available = false;
                return Ok(());
            }
            match deadline {
                None => self.cond.wait(&mut state),
                Some(at) => {
                    if self.cond.wait_until(&mut state, at).timed_out() && !state.available {
                        return if state.closed {
                            Err(SyncError::Closed)
                        } else {
                            Err(SyncError::Timeout)
                        };
                    }
                }
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.available = true;
        drop(state);
        self.cond.notify_one();
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.cond.notify_all();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_release() {
        let sem = HostSemaphore::new();
        assert!(sem.is_available());
        sem.acquire(Timeout::Infinite).unwrap();
        assert!(!sem.is_available());
        sem.release();
        assert!(sem.is_available());
    }

    #[test]
    fn test_acquire_times_out_when_held() {
        let sem = HostSemaphore::new();
        sem.acquire(Timeout::Infinite).unwrap();
        assert_eq!(sem.acquire(Timeout::Millis(10)), Err(SyncError::Timeout));
    }

    #[test]
    fn test_release_saturates_at_one() {
        let sem = HostSemaphore::new();
        sem.release();
        sem.release();
        sem.acquire(Timeout::Millis(0)).unwrap();
        assert_eq!(sem.acquire(Timeout::Millis(0)), Err(SyncError::Timeout));
    }

    #[test]
    fn test_closed_semaphore_rejects_acquire() {
        let sem = HostSemaphore::new();
        sem.close();
        assert_eq!(sem.acquire(Timeout::Infinite), Err(SyncError::Closed));
    }

    #[test]
    fn test_release_from_other_thread_wakes_waiter() {
        let sem = Arc::new(HostSemaphore::new());
        sem.acquire(Timeout::Infinite).unwrap();

        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire(Timeout::Millis(5_000)))
        };

        thread::sleep(Duration::from_millis(20));
        sem.release();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_close_wakes_waiter() {
        let sem = Arc::new(HostSemaphore::new());
        sem.acquire(Timeout::Infinite).unwrap();

        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire(Timeout::Infinite))
        };

        thread::sleep(Duration::from_millis(20));
        sem.close();
        assert_eq!(waiter.join().unwrap(), Err(SyncError::Closed));
    }

    #[test]
    fn test_critical_section_returns_value() {
        let value = critical_section(|_cs| 42);
        assert_eq!(value, 42);
    }
}
