use crate::{SPIN_COUNT, SPIN_YIELD_THRESHOLD};
use std::fmt;
use std::hint;
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Blocking handle behind a [`ThinEvent`]
///
/// The gate holds no copy of the event state. Waiters test the event's flag
/// while holding the gate lock, and `set` takes the same lock before it
/// notifies, so a wakeup cannot fall between a waiter's test and its sleep.
#[derive(Debug, Default)]
struct Gate {
    lock: Mutex<()>,
    changed: Condvar,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let _guard = self.lock();
        self.changed.notify_all();
    }

    fn wait(&self, flag: &AtomicBool) {
        let guard = self.lock();
        let _guard = self
            .changed
            .wait_while(guard, |_| !flag.load(Ordering::SeqCst))
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn wait_timeout(&self, flag: &AtomicBool, timeout: Duration) -> bool {
        let guard = self.lock();
        let _guard = self
            .changed
            .wait_timeout_while(guard, timeout, |_| !flag.load(Ordering::SeqCst))
            .unwrap_or_else(PoisonError::into_inner);
        flag.load(Ordering::SeqCst)
    }
}

/// Manual-reset event with a spin phase and a lazily created blocking handle
///
/// Most waits on a short-lived event finish while spinning, so the mutex and
/// condition variable are only allocated for waiters that actually block.
/// The handle is created at most once, and a [`ThinEvent::set`] that races
/// with its creation is never lost.
///
/// # Example
///
/// ```
/// use parakit::ThinEvent;
/// use std::sync::Arc;
/// use std::thread;
///
/// let event = Arc::new(ThinEvent::new(false));
/// let setter = event.clone();
/// thread::spawn(move || setter.set());
/// event.wait();
/// assert!(event.is_set());
/// ```
pub struct ThinEvent {
    state: AtomicBool,
    gate: OnceLock<Gate>,
}

impl ThinEvent {
    /// Create an event, optionally already set
    pub fn new(initially_set: bool) -> Self {
        Self {
            state: AtomicBool::new(initially_set),
            gate: OnceLock::new(),
        }
    }

    /// Whether the event is currently set
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    /// Set the event and release every waiter
    pub fn set(&self) {
        self.state.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        // No handle yet means no blocked waiter; one created later re-tests
        // the flag under its lock.
        if let Some(gate) = self.gate.get() {
            gate.notify();
        }
    }

    /// Clear the event; later waiters block until the next [`ThinEvent::set`]
    pub fn reset(&self) {
        self.state.store(false, Ordering::SeqCst);
    }

    /// Block until the event is set
    pub fn wait(&self) {
        if self.spin() {
            return;
        }
        self.gate().wait(&self.state);
    }

    /// Block until the event is set or `timeout` elapses; returns whether it
    /// was set
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => {
                self.wait();
                return true;
            }
        };
        if self.spin() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.gate().wait_timeout(&self.state, remaining)
    }

    fn spin(&self) -> bool {
        for i in 0..SPIN_COUNT {
            if self.is_set() {
                return true;
            }
            if i < SPIN_YIELD_THRESHOLD {
                hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
        self.is_set()
    }

    fn gate(&self) -> &Gate {
        let gate = self.gate.get_or_init(Gate::default);
        fence(Ordering::SeqCst);
        gate
    }
}

impl Default for ThinEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for ThinEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThinEvent")
            .field("is_set", &self.is_set())
            .field("has_handle", &self.gate.get().is_some())
            .finish()
    }
}
