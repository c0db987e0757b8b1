use super::ThinEvent;
use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::time::Duration;

/// A gate that opens once it has been signaled a fixed number of times
///
/// Every [`CountdownLatch::set`] decrements the count. Any call that leaves it
/// at zero or below opens the gate, so extra calls keep decrementing into
/// negative values and leave the gate open. [`CountdownLatch::reset`] rearms
/// the latch.
///
/// ```
/// use parakit::CountdownLatch;
/// use std::sync::Arc;
/// use std::thread;
///
/// let latch = Arc::new(CountdownLatch::new(3));
/// for _ in 0..3 {
///     let latch = latch.clone();
///     thread::spawn(move || {
///         latch.set();
///     });
/// }
/// latch.wait_one()?;
/// assert!(latch.is_set());
/// # Ok::<(), parakit::Error>(())
/// ```
pub struct CountdownLatch {
    remaining: AtomicIsize,
    gate: ThinEvent,
    disposed: AtomicBool,
}

impl CountdownLatch {
    /// Create a latch that opens after `count` signals; zero starts open
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicIsize::new(to_signed(count)),
            gate: ThinEvent::new(count == 0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Record one signal and return the remaining count
    pub fn set(&self) -> isize {
        let remaining = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining <= 0 {
            self.gate.set();
        }
        remaining
    }

    /// Remaining count; zero or below means the latch is open
    pub fn count(&self) -> isize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Whether the gate is open
    pub fn is_set(&self) -> bool {
        self.gate.is_set()
    }

    /// Block until the gate opens
    pub fn wait_one(&self) -> Result<()> {
        self.check_disposed()?;
        self.gate.wait();
        self.check_disposed()
    }

    /// Block until the gate opens or `timeout` elapses; returns whether the
    /// gate opened
    pub fn wait_one_timeout(&self, timeout: Duration) -> Result<bool> {
        self.check_disposed()?;
        let opened = self.gate.wait_timeout(timeout);
        self.check_disposed()?;
        Ok(opened)
    }

    /// Rearm the latch with a new count
    pub fn reset(&self, count: usize) -> Result<()> {
        self.check_disposed()?;
        self.remaining.store(to_signed(count), Ordering::Release);
        if count == 0 {
            self.gate.set();
        } else {
            self.gate.reset();
            // A set() between the store and the reset may have drained the
            // count; its gate.set() was undone by the reset above.
            if self.count() <= 0 {
                self.gate.set();
            }
        }
        Ok(())
    }

    /// Release all waiters and refuse further waits; idempotent
    ///
    /// Threads blocked in [`CountdownLatch::wait_one`] return
    /// [`Error::Disposed`].
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.gate.set();
        }
    }

    /// Whether [`CountdownLatch::dispose`] was called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }
}

fn to_signed(count: usize) -> isize {
    isize::try_from(count).unwrap_or(isize::MAX)
}

impl fmt::Debug for CountdownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountdownLatch")
            .field("count", &self.count())
            .field("is_set", &self.is_set())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
