//! Deferred adapters for file, DNS and socket collaborators
//!
//! Each function starts its operation on the ambient tokio runtime and returns
//! immediately. Outside of a runtime the result is faulted with
//! [`crate::Error::NoRuntime`].

use crate::pump::{self, PumpOptions};
use crate::{Deferred, Result};
use bytes::Bytes;
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Read a whole file
pub fn read_file<P: AsRef<Path>>(path: P) -> Deferred<Bytes> {
    let path = path.as_ref().to_path_buf();
    Deferred::spawn(async move {
        let file = File::open(&path).await?;
        pump::read_all_async(file).await
    })
}

/// Create or truncate a file and write `data` to it
pub fn write_file<P: AsRef<Path>>(path: P, data: Bytes) -> Deferred<u64> {
    let path = path.as_ref().to_path_buf();
    Deferred::spawn(async move {
        let mut file = File::create(&path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(data.len() as u64)
    })
}

/// Copy one file into another with the double-buffered pump
pub fn copy_file<P1, P2>(source: P1, destination: P2, options: PumpOptions) -> Deferred<u64>
where
    P1: AsRef<Path>,
    P2: AsRef<Path>,
{
    let source = source.as_ref().to_path_buf();
    let destination = destination.as_ref().to_path_buf();
    Deferred::spawn(async move {
        let reader = File::open(&source).await?;
        let writer = File::create(&destination).await?;
        pump::copy_async(reader, writer, &options).await
    })
}

/// Resolve a host name to socket addresses
pub fn resolve_host(host: impl Into<String>, port: u16) -> Deferred<Vec<SocketAddr>> {
    let host = host.into();
    Deferred::spawn(async move {
        let addresses = tokio::net::lookup_host((host.as_str(), port)).await?;
        Ok(addresses.collect())
    })
}

/// Connect, send `payload`, and close the connection
pub fn send(address: SocketAddr, payload: Bytes) -> Deferred<u64> {
    Deferred::spawn(async move {
        let mut stream = TcpStream::connect(address).await?;
        stream.write_all(&payload).await?;
        stream.shutdown().await?;
        Ok(payload.len() as u64)
    })
}

/// Connect, send `payload`, half-close, and read the reply until the peer
/// closes its side
pub fn exchange(address: SocketAddr, payload: Bytes) -> Deferred<Bytes> {
    Deferred::spawn(async move { exchange_inner(address, payload).await })
}

async fn exchange_inner(address: SocketAddr, payload: Bytes) -> Result<Bytes> {
    let stream = TcpStream::connect(address).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(&payload).await?;
    writer.shutdown().await?;
    pump::read_all_async(reader).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_write_then_read_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("payload.bin");

        let written = write_file(&path, Bytes::from_static(b"deferred file body")).await?;
        assert_eq!(written, 18);

        let read = read_file(&path).await?;
        assert_eq!(&read[..], b"deferred file body");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_faults() {
        let dir = tempdir().unwrap();
        let outcome = read_file(dir.path().join("absent")).await;
        assert_eq!(
            outcome.unwrap_err().io_kind(),
            Some(std::io::ErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn test_copy_file() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("source.bin");
        let destination = dir.path().join("destination.bin");
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &body)?;

        let options = PumpOptions::default().with_buffer_size(1024);
        let copied = copy_file(&source, &destination, options).await?;

        assert_eq!(copied, body.len() as u64);
        assert_eq!(std::fs::read(&destination)?, body);
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_localhost() -> Result<()> {
        let addresses = resolve_host("localhost", 8080).await?;
        assert!(!addresses.is_empty());
        assert!(addresses.iter().all(|a| a.port() == 8080));
        Ok(())
    }

    #[tokio::test]
    async fn test_exchange_with_echo_server() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut request = Vec::new();
            socket.read_to_end(&mut request).await?;
            request.reverse();
            socket.write_all(&request).await?;
            socket.shutdown().await?;
            Ok::<_, std::io::Error>(())
        });

        let reply = exchange(address, Bytes::from_static(b"ping")).await?;
        assert_eq!(&reply[..], b"gnip");
        server.await.map_err(Error::from)??;
        Ok(())
    }

    #[tokio::test]
    async fn test_send_to_closed_port_faults() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let outcome = send(address, Bytes::from_static(b"x")).await;
        assert!(outcome.unwrap_err().io_kind().is_some());
    }

    #[test]
    fn test_outside_runtime() {
        let outcome = read_file("whatever").wait();
        assert!(matches!(outcome, Err(Error::NoRuntime)));
    }
}
