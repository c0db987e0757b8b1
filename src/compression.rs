//! Compression future bridge
//!
//! Wraps a synchronous compress/decompress pair ([`Codec`]) so it can be used
//! as a deferred. Buffer input is compressed on tokio's blocking pool; stream
//! input is first drained into memory with the pump, then goes through the
//! buffer path, and the result is handed back as a readable stream. Results are
//! always fully materialized before the deferred completes.

use crate::pump::{self, PumpOptions};
use crate::{Deferred, Error, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// A synchronous compress/decompress pair
pub trait Codec: Send + Sync + 'static {
    /// Short name used in error messages
    fn name(&self) -> &'static str;

    /// Compress a complete buffer
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a complete buffer produced by [`Codec::compress`]
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block codec with a little-endian size prefix
#[cfg(feature = "compression")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

#[cfg(feature = "compression")]
impl Lz4Codec {
    const PREFIX_LEN: usize = 4;

    fn error(message: impl fmt::Display) -> Error {
        Error::Codec {
            codec: "lz4",
            message: message.to_string(),
        }
    }
}

#[cfg(feature = "compression")]
impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            // An empty block is encoded as its zero size prefix alone.
            return Ok(vec![0u8; Self::PREFIX_LEN]);
        }
        lz4::block::compress(data, Some(lz4::block::CompressionMode::FAST(1)), true)
            .map_err(|e| Self::error(format!("compression failed: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < Self::PREFIX_LEN {
            return Err(Self::error("input shorter than the size prefix"));
        }
        let mut prefix = [0u8; Self::PREFIX_LEN];
        prefix.copy_from_slice(&data[..Self::PREFIX_LEN]);
        let size = i32::from_le_bytes(prefix);
        if size < 0 {
            return Err(Self::error(format!("negative size prefix {size}")));
        }
        if size == 0 {
            return Ok(Vec::new());
        }
        lz4::block::decompress(data, None)
            .map_err(|e| Self::error(format!("decompression failed: {e}")))
    }
}

/// Which half of the codec to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Compress,
    Decompress,
}

/// Async front end over a [`Codec`]
#[derive(Clone)]
pub struct Compressor {
    codec: Arc<dyn Codec>,
    options: PumpOptions,
    concurrency_limit: usize,
}

impl Compressor {
    /// Create a compressor for `codec`
    pub fn new<C: Codec>(codec: C) -> Self {
        Self {
            codec: Arc::new(codec),
            options: PumpOptions::default(),
            concurrency_limit: num_cpus::get(),
        }
    }

    /// Compressor using [`Lz4Codec`]
    #[cfg(feature = "compression")]
    pub fn lz4() -> Self {
        Self::new(Lz4Codec)
    }

    /// Set the pump options used to drain input streams
    pub fn with_options(mut self, options: PumpOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the number of buffers compressed concurrently by batch calls
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Name of the underlying codec
    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    fn run(&self, direction: Direction, data: Bytes) -> Deferred<Bytes> {
        let codec = self.codec.clone();
        Deferred::spawn_blocking(move || {
            let output = match direction {
                Direction::Compress => codec.compress(&data)?,
                Direction::Decompress => codec.decompress(&data)?,
            };
            Ok(Bytes::from(output))
        })
    }

    fn run_stream<R>(&self, direction: Direction, reader: R) -> Deferred<Cursor<Bytes>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let bridge = self.clone();
        Deferred::spawn(async move {
            let mut input = BytesMut::new();
            pump::read_buffer_async(reader, bridge.options.buffer_size, |chunk| {
                input.extend_from_slice(chunk);
                Ok(())
            })
            .await?;
            let output = bridge.run(direction, input.freeze()).await?;
            Ok(Cursor::new(output))
        })
    }

    /// Compress a buffer off the caller's thread
    pub fn compress_async(&self, data: impl Into<Bytes>) -> Deferred<Bytes> {
        self.run(Direction::Compress, data.into())
    }

    /// Decompress a buffer off the caller's thread
    pub fn decompress_async(&self, data: impl Into<Bytes>) -> Deferred<Bytes> {
        self.run(Direction::Decompress, data.into())
    }

    /// Drain `reader`, compress its bytes and return them as a stream
    pub fn compress_stream_async<R>(&self, reader: R) -> Deferred<Cursor<Bytes>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.run_stream(Direction::Compress, reader)
    }

    /// Drain `reader`, decompress its bytes and return them as a stream
    pub fn decompress_stream_async<R>(&self, reader: R) -> Deferred<Cursor<Bytes>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.run_stream(Direction::Decompress, reader)
    }

    /// Compress many buffers, at most `concurrency_limit` at a time
    ///
    /// Output order matches input order; the first failure fails the batch.
    pub async fn compress_batch(&self, inputs: Vec<Bytes>) -> Result<Vec<Bytes>> {
        stream::iter(inputs.into_iter().map(|input| self.compress_async(input)))
            .buffered(self.concurrency_limit)
            .try_collect()
            .await
    }

    /// Decompress many buffers, at most `concurrency_limit` at a time
    pub async fn decompress_batch(&self, inputs: Vec<Bytes>) -> Result<Vec<Bytes>> {
        stream::iter(inputs.into_iter().map(|input| self.decompress_async(input)))
            .buffered(self.concurrency_limit)
            .try_collect()
            .await
    }
}

impl fmt::Debug for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("codec", &self.codec.name())
            .field("options", &self.options)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish()
    }
}

/// Compress a buffer with [`Lz4Codec`]
#[cfg(feature = "compression")]
pub fn compress_async(data: impl Into<Bytes>) -> Deferred<Bytes> {
    Compressor::lz4().compress_async(data)
}

/// Decompress a buffer produced by [`compress_async`]
#[cfg(feature = "compression")]
pub fn decompress_async(data: impl Into<Bytes>) -> Deferred<Bytes> {
    Compressor::lz4().decompress_async(data)
}
