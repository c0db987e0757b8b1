//! Deferred results
//!
//! A [`Deferred`] is a handle to a value that becomes available later, either
//! as a success value or as an [`Error`]. It is resolved exactly once through
//! one of its [`Completer`]s. Continuations attached with
//! [`Deferred::on_complete`] run exactly once, in attachment order, whether
//! they were attached before or after resolution.
//!
//! Deferreds are hot: [`Deferred::spawn`] starts the work immediately on the
//! ambient tokio runtime. They also implement [`std::future::Future`], so async
//! code simply `.await`s them, while threads outside of a runtime can block on
//! [`Deferred::wait`].
//!
//! ```no_run
//! use parakit::Deferred;
//!
//! # async fn demo() -> parakit::Result<()> {
//! let (deferred, completer) = Deferred::<u32>::pair();
//! let doubled = deferred.map(|v| v * 2);
//! completer.complete(21);
//! assert_eq!(doubled.await?, 42);
//! # Ok(())
//! # }
//! ```

mod combinators;
mod slot;

pub use self::combinators::when_all;
pub use self::slot::AsyncState;

pub(crate) use self::slot::panic_message;
use self::slot::Shared;
use crate::{Error, Result};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;

/// Resolution state of a deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    /// Not resolved yet
    Pending,
    /// Resolved with a value
    Completed,
    /// Resolved with an error
    Faulted,
}

/// A value that becomes available later
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

/// Producer side of a [`Deferred`]
///
/// Completers can be cloned; the first `resolve` wins. When every completer is
/// dropped without resolving, the deferred faults with [`Error::Abandoned`].
pub struct Completer<T: Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + Sync + 'static> Deferred<T> {
    /// Create a pending deferred together with its completer
    pub fn pair() -> (Deferred<T>, Completer<T>) {
        Self::pair_inner(None)
    }

    /// Like [`Deferred::pair`], carrying a correlation token
    pub fn pair_with_state(state: AsyncState) -> (Deferred<T>, Completer<T>) {
        Self::pair_inner(Some(state))
    }

    fn pair_inner(state: Option<AsyncState>) -> (Deferred<T>, Completer<T>) {
        let shared = Shared::new(state);
        shared.add_completer();
        (
            Deferred {
                shared: shared.clone(),
            },
            Completer { shared },
        )
    }

    /// An already completed deferred
    pub fn completed(value: T) -> Self {
        Deferred {
            shared: Shared::new_resolved(Ok(value)),
        }
    }

    /// An already faulted deferred
    pub fn faulted(error: Error) -> Self {
        Deferred {
            shared: Shared::new_resolved(Err(error)),
        }
    }

    /// Run `future` on the ambient tokio runtime
    ///
    /// Outside of a runtime the returned deferred is faulted with
    /// [`Error::NoRuntime`]; nothing is raised to the caller.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => Self::spawn_on(&handle, future),
            Err(_) => Self::faulted(Error::NoRuntime),
        }
    }

    /// Run `future` on the given runtime
    pub fn spawn_on<F>(handle: &Handle, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (deferred, completer) = Self::pair();
        handle.spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(Error::Join(panic_message(payload.as_ref()))),
            };
            completer.resolve(outcome);
        });
        deferred
    }

    /// Run a blocking closure on the runtime's blocking pool
    pub fn spawn_blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return Self::faulted(Error::NoRuntime),
        };

        let (deferred, completer) = Self::pair();
        handle.spawn_blocking(move || {
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(outcome) => outcome,
                Err(payload) => Err(Error::Join(panic_message(payload.as_ref()))),
            };
            completer.resolve(outcome);
        });
        deferred
    }

    /// Attach a continuation
    ///
    /// The continuation runs exactly once with the outcome. When the deferred
    /// is already resolved it runs before this call returns, unless another
    /// thread is currently running earlier continuations, in which case that
    /// thread runs it after them.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        self.shared.push_continuation(Box::new(continuation));
    }

    /// Current resolution state
    pub fn state(&self) -> DeferredState {
        match self.shared.outcome() {
            None => DeferredState::Pending,
            Some(outcome) => match outcome.as_ref() {
                Ok(_) => DeferredState::Completed,
                Err(_) => DeferredState::Faulted,
            },
        }
    }

    /// Whether the deferred is still pending
    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }

    /// Whether the deferred completed with a value
    pub fn is_completed(&self) -> bool {
        self.state() == DeferredState::Completed
    }

    /// Whether the deferred faulted
    pub fn is_faulted(&self) -> bool {
        self.state() == DeferredState::Faulted
    }

    /// Correlation token supplied at creation, if any
    pub fn async_state(&self) -> Option<&AsyncState> {
        self.shared.async_state()
    }
}

impl<T: Clone + Send + Sync + 'static> Deferred<T> {
    /// The outcome, if already resolved
    pub fn try_result(&self) -> Option<Result<T>> {
        self.shared.outcome().map(|outcome| (*outcome).clone())
    }

    /// Block the calling thread until the deferred resolves
    ///
    /// Must not be called from inside an async task; await the deferred
    /// there instead.
    pub fn wait(&self) -> Result<T> {
        (*self.shared.wait()).clone()
    }

    /// Block for at most `timeout`; `None` when still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        self.shared
            .wait_timeout(timeout)
            .map(|outcome| (*outcome).clone())
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.shared.poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready((*outcome).clone()),
            None => Poll::Pending,
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .field("has_async_state", &self.async_state().is_some())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Completer<T> {
    /// Resolve with a value; returns false when already resolved
    pub fn complete(&self, value: T) -> bool {
        self.shared.resolve(Ok(value))
    }

    /// Resolve with an error; returns false when already resolved
    pub fn fail(&self, error: Error) -> bool {
        self.shared.resolve(Err(error))
    }

    /// Resolve with an outcome; returns false when already resolved
    pub fn resolve(&self, outcome: Result<T>) -> bool {
        self.shared.resolve(outcome)
    }

    /// Whether the deferred has been resolved by anyone
    pub fn is_resolved(&self) -> bool {
        self.shared.outcome().is_some()
    }
}

impl<T: Send + Sync + 'static> Clone for Completer<T> {
    fn clone(&self) -> Self {
        self.shared.add_completer();
        Completer {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.shared.release_completer() {
            self.shared.resolve(Err(Error::Abandoned));
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
