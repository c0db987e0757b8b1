//! Shared resolution slot behind a deferred and its completers
//!
//! The slot is guarded by a mutex and a condition variable. Continuations and
//! wakers are collected while the slot is pending and are invoked after the
//! lock has been released, so a continuation may freely touch the deferred it
//! was attached to.

use crate::Result;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::Waker;
use std::time::{Duration, Instant};

/// Opaque correlation token carried alongside a deferred
pub type AsyncState = Arc<dyn Any + Send + Sync>;

pub(crate) type Continuation<T> = Box<dyn FnOnce(&Result<T>) + Send>;

pub(crate) struct Shared<T> {
    core: Mutex<Core<T>>,
    resolved: Condvar,
    completers: AtomicUsize,
    state: Option<AsyncState>,
}

struct Core<T> {
    outcome: Option<Arc<Result<T>>>,
    continuations: VecDeque<Continuation<T>>,
    // Set while one thread runs the continuation queue; keeps attachment order
    // when continuations are added concurrently with the drain.
    draining: bool,
    wakers: Vec<Waker>,
}

impl<T: Send + Sync + 'static> Shared<T> {
    pub(crate) fn new(state: Option<AsyncState>) -> Arc<Self> {
        Arc::new(Shared {
            core: Mutex::new(Core {
                outcome: None,
                continuations: VecDeque::new(),
                draining: false,
                wakers: Vec::new(),
            }),
            resolved: Condvar::new(),
            completers: AtomicUsize::new(0),
            state,
        })
    }

    pub(crate) fn new_resolved(outcome: Result<T>) -> Arc<Self> {
        let shared = Shared::new(None);
        shared.resolve(outcome);
        shared
    }

    fn lock(&self) -> MutexGuard<'_, Core<T>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn async_state(&self) -> Option<&AsyncState> {
        self.state.as_ref()
    }

    pub(crate) fn outcome(&self) -> Option<Arc<Result<T>>> {
        self.lock().outcome.clone()
    }

    /// Writes the outcome. Only the first call has an effect.
    pub(crate) fn resolve(&self, outcome: Result<T>) -> bool {
        let mut core = self.lock();
        if core.outcome.is_some() {
            return false;
        }

        core.outcome = Some(Arc::new(outcome));
        let wakers = std::mem::take(&mut core.wakers);
        let drain = !core.continuations.is_empty() && !core.draining;
        if drain {
            core.draining = true;
        }
        drop(core);

        self.resolved.notify_all();
        for waker in wakers {
            waker.wake();
        }
        if drain {
            self.drain();
        }
        true
    }

    pub(crate) fn push_continuation(&self, continuation: Continuation<T>) {
        let mut core = self.lock();
        core.continuations.push_back(continuation);
        if core.outcome.is_some() && !core.draining {
            core.draining = true;
            drop(core);
            self.drain();
        }
    }

    fn drain(&self) {
        let mut panicked = None;
        loop {
            let (continuation, outcome) = {
                let mut core = self.lock();
                let next = core.continuations.pop_front();
                match (next, core.outcome.clone()) {
                    (Some(continuation), Some(outcome)) => (continuation, outcome),
                    _ => {
                        core.draining = false;
                        break;
                    }
                }
            };

            // A panicking continuation must not starve the ones queued behind it.
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| continuation(&outcome)))
            {
                panicked.get_or_insert(payload);
            }
        }

        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
    }

    /// Registers a waker; returns the outcome instead when already resolved.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<Arc<Result<T>>> {
        let mut core = self.lock();
        if let Some(outcome) = &core.outcome {
            return Some(outcome.clone());
        }
        if !core.wakers.iter().any(|w| w.will_wake(waker)) {
            core.wakers.push(waker.clone());
        }
        None
    }

    pub(crate) fn wait(&self) -> Arc<Result<T>> {
        let mut core = self.lock();
        loop {
            if let Some(outcome) = &core.outcome {
                return outcome.clone();
            }
            core = self
                .resolved
                .wait(core)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<Arc<Result<T>>> {
        let deadline = Instant::now() + timeout;
        let mut core = self.lock();
        loop {
            if let Some(outcome) = &core.outcome {
                return Some(outcome.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            core = self
                .resolved
                .wait_timeout(core, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub(crate) fn add_completer(&self) {
        self.completers.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true when the last completer went away.
    pub(crate) fn release_completer(&self) -> bool {
        self.completers.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// Best effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
