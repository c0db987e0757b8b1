//! Callback style operations as deferreds
//!
//! Many collaborators expose an asynchronous operation as two halves: a start
//! call that registers a completion callback, and a finish call that turns the
//! handle delivered to that callback into the final value or error. The
//! functions in this module bridge such pairs into a [`Deferred`].
//!
//! The operation is started before the adapter returns. Errors raised by
//! either half, including panics in the start half, end up in the faulted
//! state of the returned deferred; the adapter itself never fails.
//!
//! ```
//! use parakit::adapter::adapt_with;
//!
//! // A start half that completes on another thread, and a finish half that
//! // validates the handle it receives.
//! let deferred = adapt_with(
//!     (20u32, 22u32),
//!     |(a, b), done| {
//!         std::thread::spawn(move || done(a + b));
//!         Ok(())
//!     },
//!     |sum: u32| Ok(sum),
//! );
//! assert_eq!(deferred.wait().unwrap(), 42);
//! ```

pub mod io;

use crate::deferred::panic_message;
use crate::{AsyncState, Deferred, Error, Result};
use std::panic::{self, AssertUnwindSafe};

/// Completion callback handed to the start half of an adapted operation
pub type Done<H> = Box<dyn FnOnce(H) + Send>;

/// Adapt an operation that takes no arguments
pub fn adapt<H, T, S, F>(start: S, finish: F) -> Deferred<T>
where
    H: Send + 'static,
    T: Send + Sync + 'static,
    S: FnOnce(Done<H>) -> Result<()>,
    F: FnOnce(H) -> Result<T> + Send + 'static,
{
    adapt_inner((), None, move |(), done| start(done), finish)
}

/// Adapt an operation taking an argument bundle
///
/// Positional arguments are passed as a tuple: `(a,)`, `(a, b)` or
/// `(a, b, c)`.
pub fn adapt_with<A, H, T, S, F>(args: A, start: S, finish: F) -> Deferred<T>
where
    H: Send + 'static,
    T: Send + Sync + 'static,
    S: FnOnce(A, Done<H>) -> Result<()>,
    F: FnOnce(H) -> Result<T> + Send + 'static,
{
    adapt_inner(args, None, start, finish)
}

/// Adapt an operation and attach a correlation token to the result
pub fn adapt_with_state<A, H, T, S, F>(
    args: A,
    state: AsyncState,
    start: S,
    finish: F,
) -> Deferred<T>
where
    H: Send + 'static,
    T: Send + Sync + 'static,
    S: FnOnce(A, Done<H>) -> Result<()>,
    F: FnOnce(H) -> Result<T> + Send + 'static,
{
    adapt_inner(args, Some(state), start, finish)
}

fn adapt_inner<A, H, T, S, F>(
    args: A,
    state: Option<AsyncState>,
    start: S,
    finish: F,
) -> Deferred<T>
where
    H: Send + 'static,
    T: Send + Sync + 'static,
    S: FnOnce(A, Done<H>) -> Result<()>,
    F: FnOnce(H) -> Result<T> + Send + 'static,
{
    let (deferred, completer) = match state {
        Some(state) => Deferred::pair_with_state(state),
        None => Deferred::pair(),
    };

    let on_done = completer.clone();
    let done: Done<H> = Box::new(move |handle| {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| finish(handle)))
            .unwrap_or_else(|payload| Err(Error::Join(panic_message(payload.as_ref()))));
        on_done.resolve(outcome);
    });

    match panic::catch_unwind(AssertUnwindSafe(|| start(args, done))) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            completer.fail(error);
        }
        Err(payload) => {
            completer.fail(Error::Join(panic_message(payload.as_ref())));
        }
    }

    deferred
}
