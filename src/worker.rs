//! Worker thread lifecycle
//!
//! A [`WorkerThread`] runs a work unit on a dedicated OS thread until it is
//! asked to stop. Shutdown is cooperative and happens in two phases: the
//! controller calls [`WorkerThread::request_shutdown`], which sets a flag and
//! wakes the worker if it is sleeping; the worker notices the flag at its next
//! safe point, runs the cleanup hook, and stops.
//!
//! State machine:
//!
//! ```text
//! Unstarted --start()--> Running --request_shutdown()--> ShutdownRequested
//!                           |                                   |
//!                           +------ work unit failed -----------+--> Stopped
//! ```
//!
//! Errors and panics from the work unit are not swallowed. The cleanup hook
//! still runs, then the failure is reported by [`WorkerThread::join`].
//!
//! ```no_run
//! use parakit::{WorkerEvent, WorkerThread};
//! use std::time::Duration;
//!
//! let mut worker = WorkerThread::builder("poller")
//!     .interval(Duration::from_millis(50))
//!     .on_event(|event| println!("{event:?}"))
//!     .cleanup(|| println!("closing connections"))
//!     .build(|ctx| {
//!         ctx.report_progress(50);
//!         Ok(())
//!     });
//! worker.start()?;
//! worker.request_shutdown()?;
//! worker.join()?;
//! # Ok::<(), parakit::Error>(())
//! ```

use crate::deferred::panic_message;
use crate::logging::LogSink;
use crate::{Error, Result, DEFAULT_WORKER_INTERVAL};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LOG_TARGET: &str = "parakit::worker";

/// Lifecycle state of a worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Built but not started
    Unstarted,
    /// Running its loop
    Running,
    /// Asked to stop; the loop exits at its next check
    ShutdownRequested,
    /// Loop exited and cleanup ran
    Stopped,
}

/// Notification emitted by a worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The worker was started
    Started,
    /// The work unit reported progress, in percent
    Progress(u8),
    /// Shutdown was requested (emitted once)
    ShutdownRequested,
    /// The loop exited and cleanup ran
    Finished,
}

/// Configuration options for a worker thread
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Pause between two work-unit invocations
    pub interval: Duration,
    /// Stack size of the thread, platform default when `None`
    pub stack_size: Option<usize>,
    /// Sink for diagnostics
    pub logger: LogSink,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_WORKER_INTERVAL,
            stack_size: None,
            logger: LogSink::default(),
        }
    }
}

type WorkFn = Box<dyn FnMut(&WorkerContext) -> Result<()> + Send>;
type CleanupFn = Box<dyn FnOnce() + Send>;
type Listener = Arc<dyn Fn(&WorkerEvent) + Send + Sync>;

struct Control {
    name: String,
    state: Mutex<WorkerState>,
    wake: Condvar,
    shutdown: AtomicBool,
    // Orders `ShutdownRequested` before `Finished` without holding `state`
    // while listeners run.
    emit_order: Mutex<()>,
    listeners: Vec<Listener>,
    logger: LogSink,
}

impl Control {
    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_order(&self) -> MutexGuard<'_, ()> {
        self.emit_order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WorkerEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sleep for `interval` unless shutdown is requested first. Returns false
    /// when the loop should exit.
    fn sleep(&self, interval: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .wake
            .wait_timeout_while(state, interval, |state| {
                *state != WorkerState::ShutdownRequested
            })
            .unwrap_or_else(PoisonError::into_inner);
        *state != WorkerState::ShutdownRequested
    }
}

/// Handle given to the work unit on every invocation
pub struct WorkerContext {
    control: Arc<Control>,
}

impl WorkerContext {
    /// Worker name
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Whether shutdown has been requested; long work units should poll this
    pub fn is_shutdown_requested(&self) -> bool {
        self.control.is_shutdown_requested()
    }

    /// Emit a progress notification; values above 100 are clamped
    pub fn report_progress(&self, percent: u8) {
        self.control.emit(WorkerEvent::Progress(percent.min(100)));
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("name", &self.control.name)
            .finish()
    }
}

/// Builder for [`WorkerThread`]
pub struct WorkerBuilder {
    name: String,
    options: WorkerOptions,
    listeners: Vec<Listener>,
    cleanup: Option<CleanupFn>,
}

impl WorkerBuilder {
    /// Pause between two work-unit invocations (default 10ms)
    pub fn interval(mut self, interval: Duration) -> Self {
        self.options.interval = interval;
        self
    }

    /// Replace all options at once
    pub fn options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    /// Send diagnostics to `logger`
    pub fn logger(mut self, logger: LogSink) -> Self {
        self.options.logger = logger;
        self
    }

    /// Register a lifecycle listener
    ///
    /// Listeners run synchronously on the emitting thread. They may query the
    /// worker through a [`WorkerMonitor`].
    pub fn on_event<F>(mut self, listener: F) -> Self
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Hook run exactly once when the loop exits, however it exits
    pub fn cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Finish the builder with the work unit
    pub fn build<F>(self, work: F) -> WorkerThread
    where
        F: FnMut(&WorkerContext) -> Result<()> + Send + 'static,
    {
        let control = Arc::new(Control {
            name: self.name,
            state: Mutex::new(WorkerState::Unstarted),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            emit_order: Mutex::new(()),
            listeners: self.listeners,
            logger: self.options.logger.clone(),
        });

        WorkerThread {
            control,
            options: self.options,
            pending: Some((Box::new(work), self.cleanup)),
            handle: None,
        }
    }
}

impl fmt::Debug for WorkerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerBuilder")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("listeners", &self.listeners.len())
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// A dedicated background thread with cooperative shutdown
pub struct WorkerThread {
    control: Arc<Control>,
    options: WorkerOptions,
    pending: Option<(WorkFn, Option<CleanupFn>)>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl WorkerThread {
    /// Start building a worker
    pub fn builder(name: impl Into<String>) -> WorkerBuilder {
        WorkerBuilder {
            name: name.into(),
            options: WorkerOptions::default(),
            listeners: Vec::new(),
            cleanup: None,
        }
    }

    /// Build and start a worker with default options
    pub fn spawn<F>(name: impl Into<String>, work: F) -> Result<WorkerThread>
    where
        F: FnMut(&WorkerContext) -> Result<()> + Send + 'static,
    {
        let mut worker = Self::builder(name).build(work);
        worker.start()?;
        Ok(worker)
    }

    /// Worker name
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        *self.control.lock()
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.control.is_shutdown_requested()
    }

    /// A cloneable read-only view of this worker
    pub fn monitor(&self) -> WorkerMonitor {
        WorkerMonitor {
            control: self.control.clone(),
        }
    }

    /// `Unstarted -> Running`; spawns the thread and emits `Started`
    pub fn start(&mut self) -> Result<()> {
        let (work, cleanup) = self
            .pending
            .take()
            .ok_or_else(|| Error::WorkerAlreadyStarted(self.control.name.clone()))?;

        *self.control.lock() = WorkerState::Running;
        self.control.emit(WorkerEvent::Started);
        self.control
            .logger
            .debug(LOG_TARGET, format_args!("worker '{}' started", self.control.name));

        let control = self.control.clone();
        let interval = self.options.interval;
        let mut builder = thread::Builder::new().name(self.control.name.clone());
        if let Some(stack_size) = self.options.stack_size {
            builder = builder.stack_size(stack_size);
        }

        match builder.spawn(move || run_loop(control, work, cleanup, interval)) {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(error) => {
                *self.control.lock() = WorkerState::Stopped;
                Err(error.into())
            }
        }
    }

    /// Ask the worker to stop
    ///
    /// Idempotent: only the first call changes state and emits
    /// `ShutdownRequested`. A sleeping worker is woken immediately. Fails when
    /// the worker was never started.
    pub fn request_shutdown(&self) -> Result<()> {
        let mut state = self.control.lock();
        match *state {
            WorkerState::Unstarted => Err(Error::WorkerNotStarted(self.control.name.clone())),
            WorkerState::ShutdownRequested | WorkerState::Stopped => Ok(()),
            WorkerState::Running => {
                *state = WorkerState::ShutdownRequested;
                self.control.shutdown.store(true, Ordering::Release);
                // Taken before `state` is released so `Finished` cannot
                // overtake this event.
                let order = self.control.emit_order();
                drop(state);

                self.control.wake.notify_all();
                self.control.emit(WorkerEvent::ShutdownRequested);
                drop(order);
                self.control.logger.debug(
                    LOG_TARGET,
                    format_args!("shutdown requested for worker '{}'", self.control.name),
                );
                Ok(())
            }
        }
    }

    /// Wait for the thread to exit
    ///
    /// Returns the work unit's error or panic, if any. Joining twice returns
    /// `Ok(())` the second time.
    pub fn join(&mut self) -> Result<()> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None if self.pending.is_some() => {
                return Err(Error::WorkerNotStarted(self.control.name.clone()))
            }
            None => return Ok(()),
        };

        match handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => Err(Error::WorkerPanicked {
                name: self.control.name.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Request shutdown, then join
    pub fn shutdown_and_join(&mut self) -> Result<()> {
        if self.state() != WorkerState::Unstarted {
            self.request_shutdown()?;
        }
        self.join()
    }
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.control.name)
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        let _ = self.request_shutdown();
        if let Err(error) = self.join() {
            self.control.logger.warn(
                LOG_TARGET,
                format_args!("worker '{}' ended with error: {error}", self.control.name),
            );
        }
    }
}

/// Read-only view of a worker, usable from listeners and other threads
#[derive(Clone)]
pub struct WorkerMonitor {
    control: Arc<Control>,
}

impl WorkerMonitor {
    /// Worker name
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        *self.control.lock()
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.control.is_shutdown_requested()
    }
}

impl fmt::Debug for WorkerMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerMonitor")
            .field("name", &self.control.name)
            .field("state", &self.state())
            .finish()
    }
}

fn run_loop(
    control: Arc<Control>,
    work: WorkFn,
    cleanup: Option<CleanupFn>,
    interval: Duration,
) -> Result<()> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work_loop(&control, work, interval)))
        .unwrap_or_else(|payload| {
            Err(Error::WorkerPanicked {
                name: control.name.clone(),
                message: panic_message(payload.as_ref()),
            })
        });

    let cleaned = match cleanup {
        Some(cleanup) => panic::catch_unwind(AssertUnwindSafe(cleanup)).map_err(|payload| {
            Error::WorkerPanicked {
                name: control.name.clone(),
                message: format!("cleanup: {}", panic_message(payload.as_ref())),
            }
        }),
        None => Ok(()),
    };
    if let Err(error) = &cleaned {
        control.logger.warn(LOG_TARGET, format_args!("{error}"));
    }

    *control.lock() = WorkerState::Stopped;
    {
        let _order = control.emit_order();
        control.emit(WorkerEvent::Finished);
    }
    control.logger.debug(
        LOG_TARGET,
        format_args!("worker '{}' finished", control.name),
    );

    // The work unit's failure wins over a cleanup failure.
    outcome.and(cleaned)
}

fn work_loop(control: &Arc<Control>, mut work: WorkFn, interval: Duration) -> Result<()> {
    let context = WorkerContext {
        control: control.clone(),
    };

    while !control.is_shutdown_requested() {
        work(&context).map_err(|source| Error::WorkerFailed {
            name: control.name.clone(),
            source: Box::new(source),
        })?;

        if !control.sleep(interval) {
            break;
        }
    }
    Ok(())
}
