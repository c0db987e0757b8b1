//! Integration tests for the double-buffered stream pump

use parakit::{copy_async, Error, PumpOptions, Result, StreamPump};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const BUFFER: usize = 512;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Reader over a fixed buffer that counts read calls
struct CountingReader {
    inner: Cursor<Vec<u8>>,
    reads: Arc<AtomicUsize>,
}

impl AsyncRead for CountingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Writer that counts write calls and fails from the `fail_at`-th onwards
struct FlakyWriter {
    data: Vec<u8>,
    writes: Arc<AtomicUsize>,
    fail_at: Option<usize>,
}

impl AsyncWrite for FlakyWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let call = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at.is_some_and(|fail_at| call >= fail_at) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "disk gone")));
        }
        self.data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn fixtures(
    data: Vec<u8>,
    fail_at: Option<usize>,
) -> (CountingReader, FlakyWriter, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let reads = Arc::new(AtomicUsize::new(0));
    let writes = Arc::new(AtomicUsize::new(0));
    let reader = CountingReader {
        inner: Cursor::new(data),
        reads: reads.clone(),
    };
    let writer = FlakyWriter {
        data: Vec::new(),
        writes: writes.clone(),
        fail_at,
    };
    (reader, writer, reads, writes)
}

#[tokio::test]
async fn test_copy_round_trip_lengths() -> Result<()> {
    let options = PumpOptions::default().with_buffer_size(BUFFER);

    for len in [0, 1, BUFFER, BUFFER + 1, 10 * BUFFER] {
        let data = pattern(len);
        let (reader, mut writer, _, _) = fixtures(data.clone(), None);

        let copied = copy_async(reader, &mut writer, &options).await?;
        assert_eq!(copied, len as u64, "length {len}");
        assert_eq!(writer.data, data, "length {len}");
    }
    Ok(())
}

#[tokio::test]
async fn test_empty_source_issues_no_writes() -> Result<()> {
    let (reader, mut writer, reads, writes) = fixtures(Vec::new(), None);
    let copied = copy_async(reader, &mut writer, &PumpOptions::default()).await?;

    assert_eq!(copied, 0);
    assert_eq!(writes.load(Ordering::SeqCst), 0);
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_write_failure_stops_reading() {
    let options = PumpOptions::default().with_buffer_size(BUFFER);
    let (reader, mut writer, reads, writes) = fixtures(pattern(20 * BUFFER), Some(2));

    let outcome = copy_async(reader, &mut writer, &options).await;

    assert_eq!(outcome.unwrap_err().io_kind(), Some(io::ErrorKind::BrokenPipe));
    assert_eq!(writes.load(Ordering::SeqCst), 2);
    // One read alone, then one alongside each of the two writes.
    assert_eq!(reads.load(Ordering::SeqCst), 3);
    assert_eq!(writer.data.len(), BUFFER);
}

#[tokio::test]
async fn test_stream_pump_with_large_file_preset() -> Result<()> {
    let data = pattern(3 * 1024 * 1024 + 17);
    let pump = StreamPump::new(PumpOptions::large_file());

    let collected = pump.read_all(Cursor::new(data.clone())).await?;
    assert_eq!(collected.len(), data.len());

    let copied = pump.copy(Cursor::new(data.clone()), Vec::new()).await?;
    assert_eq!(copied, data.len() as u64);
    Ok(())
}

#[tokio::test]
async fn test_zero_buffer_faults_the_deferred() {
    let pump = StreamPump::new(PumpOptions::default().with_buffer_size(0));
    let outcome = pump.copy(Cursor::new(vec![1u8]), Vec::new()).await;
    assert!(matches!(outcome, Err(Error::InvalidArgument(_))));
}
