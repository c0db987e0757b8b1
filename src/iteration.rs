//! Async iteration driver
//!
//! Runs a lazily produced sequence of deferred steps. The source decides after
//! every consumed step whether the sequence goes on, which is how multi-stage
//! pipelines ("keep reading until a read returns zero bytes") are expressed.
//!
//! Two modes are supported:
//!
//! - [`IterationMode::Sequential`]: step `i + 1` is requested only after step
//!   `i` has been awaited and consumed.
//! - [`IterationMode::Overlapped`]: step `i + 1` is requested before step `i`
//!   is awaited, so at most two steps are in flight. Consumption still happens
//!   strictly in order.
//!
//! The first faulted step (or failed consumption) ends the run with that error
//! and the source is not asked for any further step.

use crate::logging::LogSink;
use crate::{Deferred, Result};
use std::marker::PhantomData;

const LOG_TARGET: &str = "parakit::iteration";

/// How steps are issued relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationMode {
    /// One step in flight at a time
    #[default]
    Sequential,
    /// The next step is issued before the current one is awaited
    Overlapped,
}

/// Decision returned after consuming a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going
    Continue,
    /// End the sequence; this is the termination sentinel
    Stop,
}

/// Producer of a step sequence
pub trait StepSource: Send {
    /// Value produced by one step
    type Output: Clone + Send + Sync + 'static;

    /// Issue the next step, or `None` when the sequence is exhausted
    fn next_step(&mut self) -> Option<Deferred<Self::Output>>;

    /// Consume the result of a completed step
    fn consume(&mut self, output: Self::Output) -> Result<Flow>;
}

/// Runs step sources
#[derive(Debug, Clone, Default)]
pub struct Driver {
    mode: IterationMode,
    logger: LogSink,
}

impl Driver {
    /// Create a driver for the given mode
    pub fn new(mode: IterationMode) -> Self {
        Self {
            mode,
            logger: LogSink::default(),
        }
    }

    /// Send diagnostics to `logger`
    pub fn with_logger(mut self, logger: LogSink) -> Self {
        self.logger = logger;
        self
    }

    /// The configured mode
    pub fn mode(&self) -> IterationMode {
        self.mode
    }

    /// Drive `source` to the end; returns the number of consumed steps
    pub async fn run<S: StepSource>(&self, source: &mut S) -> Result<u64> {
        let outcome = match self.mode {
            IterationMode::Sequential => self.run_sequential(source).await,
            IterationMode::Overlapped => self.run_overlapped(source).await,
        };
        match &outcome {
            Ok(steps) => self
                .logger
                .trace(LOG_TARGET, format_args!("sequence finished after {steps} steps")),
            Err(error) => self
                .logger
                .debug(LOG_TARGET, format_args!("sequence aborted: {error}")),
        }
        outcome
    }

    async fn run_sequential<S: StepSource>(&self, source: &mut S) -> Result<u64> {
        let mut steps = 0u64;
        while let Some(step) = source.next_step() {
            let output = step.await?;
            steps += 1;
            if source.consume(output)? == Flow::Stop {
                break;
            }
        }
        Ok(steps)
    }

    async fn run_overlapped<S: StepSource>(&self, source: &mut S) -> Result<u64> {
        let mut steps = 0u64;
        let mut current = match source.next_step() {
            Some(step) => step,
            None => return Ok(0),
        };

        loop {
            let next = source.next_step();
            let output = current.await?;
            steps += 1;

            if source.consume(output)? == Flow::Stop {
                // The step issued ahead still runs; wait for it so nothing is
                // left in flight once the run reports completion.
                if let Some(pending) = next {
                    pending.await?;
                }
                break;
            }

            match next {
                Some(step) => current = step,
                None => break,
            }
        }
        Ok(steps)
    }

    /// Start driving `source` on the ambient runtime
    pub fn spawn<S>(&self, mut source: S) -> Deferred<u64>
    where
        S: StepSource + 'static,
    {
        let driver = self.clone();
        Deferred::spawn(async move { driver.run(&mut source).await })
    }
}

/// Drive `source` with a default driver
pub async fn drive<S: StepSource>(source: &mut S, mode: IterationMode) -> Result<u64> {
    Driver::new(mode).run(source).await
}

/// Start driving `source` on the ambient runtime
pub fn iterate<S>(source: S, mode: IterationMode) -> Deferred<u64>
where
    S: StepSource + 'static,
{
    Driver::new(mode).spawn(source)
}

/// Start driving a source made of two closures
pub fn iterate_fn<O, P, C>(produce: P, consume: C, mode: IterationMode) -> Deferred<u64>
where
    O: Clone + Send + Sync + 'static,
    P: FnMut() -> Option<Deferred<O>> + Send + 'static,
    C: FnMut(O) -> Result<Flow> + Send + 'static,
{
    iterate(FnSource::new(produce, consume), mode)
}

/// [`StepSource`] built from a producer and a consumer closure
pub struct FnSource<O, P, C> {
    produce: P,
    consume: C,
    _output: PhantomData<fn() -> O>,
}

impl<O, P, C> FnSource<O, P, C> {
    /// Combine the two closures
    pub fn new(produce: P, consume: C) -> Self {
        Self {
            produce,
            consume,
            _output: PhantomData,
        }
    }
}

impl<O, P, C> StepSource for FnSource<O, P, C>
where
    O: Clone + Send + Sync + 'static,
    P: FnMut() -> Option<Deferred<O>> + Send,
    C: FnMut(O) -> Result<Flow> + Send,
{
    type Output = O;

    fn next_step(&mut self) -> Option<Deferred<O>> {
        (self.produce)()
    }

    fn consume(&mut self, output: O) -> Result<Flow> {
        (self.consume)(output)
    }
}

impl<O, P, C> std::fmt::Debug for FnSource<O, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Completer, Error};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Simulated reads: returns the queued lengths, then zero forever
    struct ChunkSource {
        lengths: VecDeque<usize>,
        issued: usize,
        consumed: Vec<usize>,
    }

    impl ChunkSource {
        fn new(lengths: &[usize]) -> Self {
            Self {
                lengths: lengths.iter().copied().collect(),
                issued: 0,
                consumed: Vec::new(),
            }
        }
    }

    impl StepSource for ChunkSource {
        type Output = usize;

        fn next_step(&mut self) -> Option<Deferred<usize>> {
            self.issued += 1;
            let length = self.lengths.pop_front().unwrap_or(0);
            Some(Deferred::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(length)
            }))
        }

        fn consume(&mut self, length: usize) -> Result<Flow> {
            if length == 0 {
                return Ok(Flow::Stop);
            }
            self.consumed.push(length);
            Ok(Flow::Continue)
        }
    }

    #[tokio::test]
    async fn test_sequential_stops_on_sentinel() -> Result<()> {
        let mut source = ChunkSource::new(&[4, 4, 2]);
        let steps = drive(&mut source, IterationMode::Sequential).await?;

        assert_eq!(steps, 4);
        assert_eq!(source.consumed, vec![4, 4, 2]);
        assert_eq!(source.issued, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_overlapped_issues_one_ahead() -> Result<()> {
        let mut source = ChunkSource::new(&[4, 4, 2]);
        let steps = drive(&mut source, IterationMode::Overlapped).await?;

        assert_eq!(steps, 4);
        assert_eq!(source.consumed, vec![4, 4, 2]);
        // The step after the sentinel was already issued.
        assert_eq!(source.issued, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_source() -> Result<()> {
        let mut remaining = 3;
        let steps = iterate_fn(
            move || {
                if remaining == 0 {
                    return None;
                }
                remaining -= 1;
                Some(Deferred::completed(remaining))
            },
            |_| Ok(Flow::Continue),
            IterationMode::Overlapped,
        )
        .await?;
        assert_eq!(steps, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_overlapped_never_more_than_two_in_flight() -> Result<()> {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut issued = 0;

        let (flight, top) = (in_flight.clone(), peak.clone());
        let produce = move || {
            if issued == 20 {
                return None;
            }
            issued += 1;
            let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
            top.fetch_max(now, Ordering::SeqCst);
            Some(Deferred::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(())
            }))
        };
        let flight = in_flight.clone();
        let consume = move |()| {
            flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Flow::Continue)
        };

        let steps = iterate_fn(produce, consume, IterationMode::Overlapped).await?;
        assert_eq!(steps, 20);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_consumption_order_is_preserved() -> Result<()> {
        // Every second step finishes before its predecessor.
        let mut index = 0u64;
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();

        let steps = iterate_fn(
            move || {
                if index == 6 {
                    return None;
                }
                let current = index;
                index += 1;
                let delay = if current % 2 == 0 { 10 } else { 1 };
                Some(Deferred::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(current)
                }))
            },
            move |value| {
                seen.lock().unwrap().push(value);
                Ok(Flow::Continue)
            },
            IterationMode::Overlapped,
        )
        .await?;

        assert_eq!(steps, 6);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        Ok(())
    }

    #[tokio::test]
    async fn test_fault_stops_issuing() {
        for mode in [IterationMode::Sequential, IterationMode::Overlapped] {
            let issued = Arc::new(AtomicUsize::new(0));
            let counter = issued.clone();

            let outcome = iterate_fn(
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 2 {
                        Some(Deferred::<u32>::faulted(Error::msg("disk on fire")))
                    } else {
                        Some(Deferred::completed(1))
                    }
                },
                |_| Ok(Flow::Continue),
                mode,
            )
            .await;

            assert_eq!(outcome.unwrap_err().to_string(), "disk on fire");
            let expected = match mode {
                IterationMode::Sequential => 3,
                IterationMode::Overlapped => 4,
            };
            assert_eq!(issued.load(Ordering::SeqCst), expected, "{mode:?}");
        }
    }

    #[tokio::test]
    async fn test_consume_error_aborts() {
        let outcome = iterate_fn(
            || Some(Deferred::completed(0u8)),
            |_| Err(Error::InvalidArgument("bad chunk".into())),
            IterationMode::Sequential,
        )
        .await;
        assert!(matches!(outcome, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_steps_resolved_from_outside() -> Result<()> {
        let completers: Arc<Mutex<Vec<Completer<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let pending = completers.clone();
        let mut produced = 0;

        let run = iterate_fn(
            move || {
                if produced == 2 {
                    return None;
                }
                produced += 1;
                let (step, completer) = Deferred::pair();
                pending.lock().unwrap().push(completer);
                Some(step)
            },
            |_| Ok(Flow::Continue),
            IterationMode::Sequential,
        );

        for expected in 1..=2 {
            while completers.lock().unwrap().len() < expected {
                tokio::task::yield_now().await;
            }
            assert!(run.is_pending());
            completers.lock().unwrap()[expected - 1].complete(expected as u8);
        }

        assert_eq!(run.await?, 2);
        Ok(())
    }
}
