//! Pluggable byte transports.
//!
//! Everything above the connection layer talks to a [`Transport`] and never
//! needs to know whether the bytes travel in clear text or inside TLS.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Operations a connection needs from the underlying stream.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Reads into `buf`, returning 0 at end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `buf`.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Copies available bytes into `buf` without consuming them. Waits
    /// until at least one byte or end of stream is available.
    async fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Waits up to `timeout` for data or end of stream to arrive, without
    /// consuming anything. A zero timeout checks without waiting.
    ///
    /// Socket readiness alone is not enough: it can stay set after a read
    /// that drained the socket exactly, so implementations must try an
    /// actual read or peek.
    async fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Shuts the stream down.
    async fn close(&mut self) -> io::Result<()>;

    /// Address of the remote end.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

/// A clear-text TCP stream.
#[derive(Debug)]
pub struct PlainTransport {
    stream: TcpStream,
}

impl PlainTransport {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Transport for PlainTransport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }

    async fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.peek(buf).await
    }

    async fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut byte = [0u8; 1];
        match tokio::time::timeout(timeout, self.stream.peek(&mut byte)).await {
            Ok(peeked) => peeked.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hello").await.unwrap();
        });

        let mut transport = PlainTransport::new(TcpStream::connect(addr).await.unwrap());
        assert_eq!(transport.peer_addr().unwrap(), addr);
        server.await.unwrap();

        let mut peeked = [0u8; 5];
        let mut n = 0;
        while n < 5 {
            n = transport.peek(&mut peeked).await.unwrap();
        }
        assert_eq!(&peeked, b"hello");

        let mut read = [0u8; 5];
        let mut got = 0;
        while got < 5 {
            got += transport.read(&mut read[got..]).await.unwrap();
        }
        assert_eq!(&read, b"hello");
        assert_eq!(transport.read(&mut read).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drained_idle_stream_is_not_readable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"12345").await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut transport = PlainTransport::new(TcpStream::connect(addr).await.unwrap());
        let mut buf = [0u8; 5];
        let mut got = 0;
        while got < 5 {
            got += transport.read(&mut buf[got..]).await.unwrap();
        }
        assert!(!transport.poll_readable(Duration::ZERO).await.unwrap());
        server.abort();
    }

    #[tokio::test]
    async fn test_closed_stream_is_readable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut transport = PlainTransport::new(TcpStream::connect(addr).await.unwrap());
        server.await.unwrap();
        assert!(
            transport
                .poll_readable(Duration::from_secs(5))
                .await
                .unwrap()
        );
    }
}
