//! Continuation chaining on deferreds
//!
//! Every combinator attaches a continuation to its source and resolves a new
//! deferred from it. No combinator blocks.

use super::Deferred;
use crate::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

impl<T: Clone + Send + Sync + 'static> Deferred<T> {
    /// Continue with the full outcome of this deferred
    pub fn then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        let (next, completer) = Deferred::pair();
        self.on_complete(move |outcome| {
            completer.resolve(f(outcome.clone()));
        });
        next
    }

    /// Transform the success value; errors pass through untouched
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |outcome| outcome.map(f))
    }

    /// Transform an error into a value or a different error
    pub fn recover<F>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        self.then(move |outcome| outcome.or_else(f))
    }

    /// Chain another deferred operation onto the success value
    pub fn and_then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        let (next, completer) = Deferred::pair();
        self.on_complete(move |outcome| match outcome {
            Ok(value) => {
                let inner = f(value.clone());
                inner.on_complete(move |inner_outcome| {
                    completer.resolve(inner_outcome.clone());
                });
            }
            Err(error) => {
                completer.fail(error.clone());
            }
        });
        next
    }
}

impl<T: Clone + Send + Sync + 'static> Deferred<Deferred<T>> {
    /// Flatten a deferred deferred
    ///
    /// The result resolves when the inner deferred resolves; a fault of either
    /// level faults the result.
    pub fn flatten(&self) -> Deferred<T> {
        self.and_then(|inner| inner)
    }
}

/// Resolve once every input resolved
///
/// Values keep the input order. The first fault observed faults the result
/// immediately; the remaining inputs keep running but are ignored.
pub fn when_all<T>(deferreds: Vec<Deferred<T>>) -> Deferred<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    if deferreds.is_empty() {
        return Deferred::completed(Vec::new());
    }

    let total = deferreds.len();
    let (all, completer) = Deferred::pair();
    let slots: Arc<Mutex<Vec<Option<T>>>> = Arc::new(Mutex::new(vec![None; total]));
    let remaining = Arc::new(AtomicUsize::new(total));

    for (index, deferred) in deferreds.into_iter().enumerate() {
        let completer = completer.clone();
        let slots = slots.clone();
        let remaining = remaining.clone();
        deferred.on_complete(move |outcome| match outcome {
            Ok(value) => {
                slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(value.clone());
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let values = std::mem::take(
                        &mut *slots.lock().unwrap_or_else(PoisonError::into_inner),
                    );
                    completer.complete(values.into_iter().flatten().collect());
                }
            }
            Err(error) => {
                completer.fail(error.clone());
            }
        });
    }

    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_map_and_then_chain() {
        let (source, completer) = Deferred::<u32>::pair();
        let chained = source
            .map(|v| v + 1)
            .and_then(|v| Deferred::completed(format!("value={v}")));

        assert!(chained.is_pending());
        completer.complete(41);
        assert_eq!(chained.wait().unwrap(), "value=42");
    }

    #[test]
    fn test_map_skips_faults() {
        let source = Deferred::<u32>::faulted(Error::msg("read failed"));
        let mapped = source.map(|v| v * 2);
        assert_eq!(mapped.wait().unwrap_err().to_string(), "read failed");
    }

    #[test]
    fn test_recover() {
        let source = Deferred::<u32>::faulted(Error::Abandoned);
        assert_eq!(source.recover(|_| Ok(0)).wait().unwrap(), 0);
    }

    #[test]
    fn test_then_sees_errors() {
        let source = Deferred::<u32>::faulted(Error::NoRuntime);
        let described = source.then(|outcome| Ok(outcome.is_err()));
        assert!(described.wait().unwrap());
    }

    #[test]
    fn test_flatten_waits_for_inner() {
        let (outer, outer_completer) = Deferred::<Deferred<u32>>::pair();
        let (inner, inner_completer) = Deferred::<u32>::pair();
        let flat = outer.flatten();

        outer_completer.complete(inner);
        assert!(flat.is_pending());

        inner_completer.complete(8);
        assert_eq!(flat.wait().unwrap(), 8);
    }

    #[test]
    fn test_flatten_inner_fault() {
        let outer = Deferred::completed(Deferred::<u32>::faulted(Error::Disposed));
        assert!(matches!(outer.flatten().wait(), Err(Error::Disposed)));
    }

    #[test]
    fn test_when_all_keeps_order() {
        let pairs: Vec<_> = (0..4).map(|_| Deferred::<u32>::pair()).collect();
        let all = when_all(pairs.iter().map(|(d, _)| d.clone()).collect());

        for (i, (_, completer)) in pairs.iter().enumerate().rev() {
            assert!(all.is_pending());
            completer.complete(i as u32 * 10);
        }
        assert_eq!(all.wait().unwrap(), vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_when_all_first_fault_wins() {
        let (slow, _slow_completer) = Deferred::<u32>::pair();
        let failing = Deferred::faulted(Error::msg("second input failed"));
        let all = when_all(vec![slow, failing]);

        let outcome = all.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome.unwrap_err().to_string(), "second input failed");
    }

    #[test]
    fn test_when_all_empty() {
        assert!(when_all::<u8>(Vec::new()).wait().unwrap().is_empty());
    }
}
