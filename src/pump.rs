//! Stream pump
//!
//! This module moves bytes between async streams:
//!
//! - [`copy_async`] is a double-buffered copy. While the bytes of read `N`
//!   are being written from one buffer, read `N + 1` fills the other one, so
//!   the latency of both ends overlaps.
//! - [`read_buffer_async`] drives one read per step through a sequential
//!   [`Driver`] and hands each chunk to a synchronous sink before the next
//!   read is issued.
//! - [`read_all_async`] collects a whole stream into memory.
//!
//! [`StreamPump`] exposes the same operations as hot [`Deferred`] values.

use crate::iteration::{Driver, Flow, IterationMode, StepSource};
use crate::logging::LogSink;
use crate::{Deferred, Error, Result, DEFAULT_BUFFER_SIZE};
use bytes::{Bytes, BytesMut};
use pin_project::pin_project;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

const LOG_TARGET: &str = "parakit::pump";

/// Configuration options for the pump
#[derive(Debug, Clone)]
pub struct PumpOptions {
    /// Capacity of each buffer
    pub buffer_size: usize,
    /// Yield to the scheduler every this many rounds (0 disables yielding)
    pub yield_every: usize,
    /// Log a progress line every 100 rounds
    pub report_progress: bool,
    /// Sink for diagnostics
    pub logger: LogSink,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            yield_every: 16,
            report_progress: false,
            logger: LogSink::default(),
        }
    }
}

impl PumpOptions {
    /// Create options optimized for large files
    pub fn large_file() -> Self {
        Self {
            buffer_size: 1024 * 1024, // 1MB buffers
            yield_every: 4,
            report_progress: true,
            ..Self::default()
        }
    }

    /// Create options optimized for memory-constrained environments
    pub fn low_memory() -> Self {
        Self {
            buffer_size: 16 * 1024, // 16KB buffers
            ..Self::default()
        }
    }

    /// Set the buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the logger
    pub fn with_logger(mut self, logger: LogSink) -> Self {
        self.logger = logger;
        self
    }

    /// Check the options before any buffer is allocated
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidArgument(
                "pump buffer size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Copy `reader` into `writer` with two alternating buffers
///
/// Returns the number of bytes written. A zero-length read ends the copy
/// after the write in flight has finished; an empty source never writes. A
/// failed write faults the copy and no further read is issued. The writer is
/// flushed before the copy completes.
pub async fn copy_async<R, W>(mut reader: R, mut writer: W, options: &PumpOptions) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    options.validate()?;

    let mut buffers = [
        vec![0u8; options.buffer_size],
        vec![0u8; options.buffer_size],
    ];
    // Index of the buffer holding bytes that still have to be written.
    let mut active = 0usize;
    let mut pending = 0usize;
    let mut total = 0u64;
    let mut rounds = 0usize;

    loop {
        let (low, high) = buffers.split_at_mut(1);
        let (write_buf, read_buf) = if active == 0 {
            (&low[0], &mut high[0])
        } else {
            (&high[0], &mut low[0])
        };

        let read = reader.read(read_buf);
        let read_len = if pending > 0 {
            let write = writer.write_all(&write_buf[..pending]);
            let (read_result, write_result) = futures::join!(read, write);
            write_result?;
            total += pending as u64;
            read_result?
        } else {
            read.await?
        };

        if read_len == 0 {
            break;
        }

        pending = read_len;
        active ^= 1;
        rounds += 1;

        if options.report_progress && rounds % 100 == 0 {
            options.logger.debug(
                LOG_TARGET,
                format_args!("copied {rounds} chunks ({total} bytes)"),
            );
        }
        if options.yield_every > 0 && rounds % options.yield_every == 0 {
            tokio::task::yield_now().await;
        }
    }

    writer.flush().await?;
    options
        .logger
        .trace(LOG_TARGET, format_args!("copy finished: {total} bytes"));
    Ok(total)
}

/// Step source issuing one read per step; an empty chunk ends the sequence
struct ChunkReads<R, F> {
    reader: Arc<Mutex<R>>,
    buffer_size: usize,
    sink: F,
    total: u64,
}

impl<R, F> StepSource for ChunkReads<R, F>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(&[u8]) -> Result<()> + Send,
{
    type Output = Bytes;

    fn next_step(&mut self) -> Option<Deferred<Bytes>> {
        let reader = self.reader.clone();
        let buffer_size = self.buffer_size;
        Some(Deferred::spawn(async move {
            let mut buffer = BytesMut::zeroed(buffer_size);
            let read_len = reader.lock().await.read(&mut buffer[..]).await?;
            buffer.truncate(read_len);
            Ok(buffer.freeze())
        }))
    }

    fn consume(&mut self, chunk: Bytes) -> Result<Flow> {
        if chunk.is_empty() {
            return Ok(Flow::Stop);
        }
        (self.sink)(&chunk)?;
        self.total += chunk.len() as u64;
        Ok(Flow::Continue)
    }
}

/// Read `reader` chunk by chunk, handing every chunk to `sink`
///
/// Each read is one step of a sequential [`Driver`], so the sink runs before
/// the next read is issued. Returns the number of bytes read. An error from
/// the sink ends the read. Reads are spawned on the ambient tokio runtime;
/// without one the call fails with [`Error::NoRuntime`].
pub async fn read_buffer_async<R, F>(reader: R, buffer_size: usize, sink: F) -> Result<u64>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(&[u8]) -> Result<()> + Send,
{
    if buffer_size == 0 {
        return Err(Error::InvalidArgument(
            "read buffer size must be positive".to_string(),
        ));
    }

    let mut reads = ChunkReads {
        reader: Arc::new(Mutex::new(reader)),
        buffer_size,
        sink,
        total: 0,
    };
    Driver::new(IterationMode::Sequential).run(&mut reads).await?;
    Ok(reads.total)
}

/// Read a whole stream into memory
pub async fn read_all_async<R>(reader: R) -> Result<Bytes>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut collected = BytesMut::new();
    read_buffer_async(reader, DEFAULT_BUFFER_SIZE, |chunk| {
        collected.extend_from_slice(chunk);
        Ok(())
    })
    .await?;
    Ok(collected.freeze())
}

/// Pump operations returning hot deferreds
#[derive(Debug, Clone, Default)]
pub struct StreamPump {
    options: PumpOptions,
}

impl StreamPump {
    /// Create a pump with the given options
    pub fn new(options: PumpOptions) -> Self {
        Self { options }
    }

    /// The pump's options
    pub fn options(&self) -> &PumpOptions {
        &self.options
    }

    /// Start a double-buffered copy
    pub fn copy<R, W>(&self, reader: R, writer: W) -> Deferred<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let options = self.options.clone();
        Deferred::spawn(async move { copy_async(reader, writer, &options).await })
    }

    /// Start reading a whole stream into memory
    pub fn read_all<R>(&self, reader: R) -> Deferred<Bytes>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer_size = self.options.buffer_size;
        Deferred::spawn(async move {
            let mut collected = BytesMut::new();
            read_buffer_async(reader, buffer_size, |chunk| {
                collected.extend_from_slice(chunk);
                Ok(())
            })
            .await?;
            Ok(collected.freeze())
        })
    }

    /// Start a chunked read feeding `sink`
    pub fn read_buffer<R, F>(&self, reader: R, sink: F) -> Deferred<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: FnMut(&[u8]) -> Result<()> + Send + 'static,
    {
        let buffer_size = self.options.buffer_size;
        Deferred::spawn(async move { read_buffer_async(reader, buffer_size, sink).await })
    }
}

/// Writer adapter reporting the running byte count after every write
#[pin_project]
pub struct ProgressWriter<W, F> {
    #[pin]
    inner: W,
    written: u64,
    on_progress: F,
}

impl<W, F> ProgressWriter<W, F>
where
    W: AsyncWrite,
    F: FnMut(u64),
{
    /// Wrap `inner`
    pub fn new(inner: W, on_progress: F) -> Self {
        Self {
            inner,
            written: 0,
            on_progress,
        }
    }

    /// Bytes accepted by the inner writer so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W, F> AsyncWrite for ProgressWriter<W, F>
where
    W: AsyncWrite,
    F: FnMut(u64),
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                *this.written += written as u64;
                (this.on_progress)(*this.written);
                Poll::Ready(Ok(written))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

impl<W: fmt::Debug, F> fmt::Debug for ProgressWriter<W, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressWriter")
            .field("inner", &self.inner)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}
