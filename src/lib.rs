//! parakit - deferred results and concurrency building blocks for tokio
//!
//! This crate bridges callback-style and blocking operations into awaitable,
//! composable results, and provides a small set of primitives around them:
//!
//! - [`Deferred`] - a single-assignment result with ordered continuations,
//!   usable both from async code (`.await`) and from plain threads (`wait`)
//! - [`adapter`] - turn a begin/end pair into a [`Deferred`], plus ready-made
//!   adapters for files, DNS and TCP
//! - [`iteration`] - drive a sequence of asynchronous steps, sequentially or
//!   with one step of read-ahead
//! - [`pump`] - double-buffered stream copy with progress reporting
//! - [`compression`] - run a synchronous codec (LZ4 by default) off the
//!   caller's thread
//! - [`worker`] - a dedicated background thread with cooperative shutdown
//! - [`sync`] - countdown latch, spin-then-block event, per-thread random
//!
//! # Example
//!
//! ```no_run
//! use parakit::{Compressor, Deferred, StreamPump, PumpOptions};
//! use std::io::Cursor;
//!
//! # async fn example() -> parakit::Result<()> {
//! // Compress a buffer on the blocking pool
//! let compressed = Compressor::lz4().compress_async(vec![7u8; 4096]).await?;
//!
//! // Copy a stream with the double-buffered pump
//! let pump = StreamPump::new(PumpOptions::large_file());
//! let copied = pump
//!     .copy(Cursor::new(compressed.to_vec()), Vec::new())
//!     .await?;
//! assert_eq!(copied as usize, compressed.len());
//!
//! // Chain continuations
//! let doubled = Deferred::completed(21).map(|n| n * 2);
//! assert_eq!(doubled.await?, 42);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

// Public modules
pub mod adapter;
pub mod common;
pub mod compression;
pub mod deferred;
pub mod error;
pub mod iteration;
pub mod logging;
pub mod pump;
pub mod sync;
pub mod worker;

// Re-export commonly used types
pub use common::{
    Error, Result, DEFAULT_BUFFER_SIZE, DEFAULT_WORKER_INTERVAL, SPIN_COUNT,
    SPIN_YIELD_THRESHOLD,
};
pub use deferred::{when_all, AsyncState, Completer, Deferred, DeferredState};
pub use logging::LogSink;

pub use adapter::{adapt, adapt_with, adapt_with_state};
pub use iteration::{drive, iterate, iterate_fn, Driver, Flow, IterationMode, StepSource};
pub use pump::{copy_async, read_all_async, read_buffer_async, ProgressWriter, PumpOptions, StreamPump};

pub use compression::{Codec, Compressor};
#[cfg(feature = "compression")]
pub use compression::{compress_async, decompress_async, Lz4Codec};

pub use sync::{CountdownLatch, ThinEvent, ThreadSafeRandom};
pub use worker::{
    WorkerBuilder, WorkerContext, WorkerEvent, WorkerMonitor, WorkerOptions, WorkerState,
    WorkerThread,
};
