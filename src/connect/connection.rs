//! A transport plus the read discipline the HTTP layer relies on.
//!
//! Heads are read by peeking first and then consuming exactly up
//! to the terminator, so bytes belonging to the body are never pulled out
//! of the socket early. That keeps body framing and connection reuse simple.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, trace};

use super::ConnectError;
use super::transport::Transport;

/// Upper bound on a response head.
pub const MAX_HEAD_SIZE: usize = 65_536;

const PEEK_SIZE: usize = 4_096;

/// An open connection to one peer.
#[derive(Debug)]
pub struct Connection {
    transport: Box<dyn Transport>,
    peer: SocketAddr,
    tls: bool,
    read_timeout: Option<Duration>,
}

impl Connection {
    /// Wraps a transport. `read_timeout` bounds every individual read.
    #[must_use]
    pub fn new(
        transport: Box<dyn Transport>,
        peer: SocketAddr,
        tls: bool,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            peer,
            tls,
            read_timeout,
        }
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Reads whatever is available, up to `buf.len()`. Returns 0 at end of
    /// stream.
    ///
    /// # Errors
    ///
    /// [`ConnectError::ReadTimeout`] or [`ConnectError::Read`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ConnectError> {
        let read = self.transport.read(buf);
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ConnectError::ReadTimeout)?,
            None => read.await,
        }
        .map_err(ConnectError::read)
    }

    /// Peeks at available bytes without consuming them.
    ///
    /// # Errors
    ///
    /// [`ConnectError::ReadTimeout`] or [`ConnectError::Read`].
    pub async fn peek(&mut self, buf: &mut [u8]) -> Result<usize, ConnectError> {
        let peek = self.transport.peek(buf);
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, peek)
                .await
                .map_err(|_| ConnectError::ReadTimeout)?,
            None => peek.await,
        }
        .map_err(ConnectError::read)
    }

    /// Consumes exactly `count` bytes that an earlier peek reported, copying
    /// them into `out` when given.
    ///
    /// # Errors
    ///
    /// Read errors, or [`ConnectError::Closed`] if the stream ends early.
    pub async fn consume(
        &mut self,
        mut count: usize,
        mut out: Option<&mut Vec<u8>>,
    ) -> Result<(), ConnectError> {
        let mut scratch = [0u8; PEEK_SIZE];
        while count > 0 {
            let want = count.min(scratch.len());
            let n = self.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Err(ConnectError::Closed);
            }
            if let Some(out) = out.as_deref_mut() {
                out.extend_from_slice(&scratch[..n]);
            }
            count -= n;
        }
        Ok(())
    }

    /// Writes all of `buf` to the peer.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Write`].
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), ConnectError> {
        self.transport
            .write_all(buf)
            .await
            .map_err(ConnectError::write)
    }

    /// Reads a response head: everything up to and including the first
    /// empty line.
    ///
    /// If the stream does not start with `HTTP` the peer is assumed to be
    /// speaking HTTP/0.9; an empty head is returned and nothing is
    /// consumed. If the stream ends mid-head, whatever arrived is
    /// returned.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Closed`] when the peer sent nothing at all,
    /// [`ConnectError::TooLarge`] past [`MAX_HEAD_SIZE`], or read errors.
    pub async fn read_head(&mut self) -> Result<Vec<u8>, ConnectError> {
        let mut head = Vec::new();
        let mut checked_prefix = false;
        let mut peeked = vec![0u8; PEEK_SIZE];

        loop {
            let n = self.peek(&mut peeked).await?;
            if n == 0 {
                if head.is_empty() {
                    return Err(ConnectError::Closed);
                }
                debug!(bytes = head.len(), "stream ended inside response head");
                return Ok(head);
            }
            let fresh = &peeked[..n];

            if !checked_prefix {
                let mut probe = head.clone();
                probe.extend_from_slice(fresh);
                let len = probe.len().min(4);
                if probe[..len] != b"HTTP"[..len] {
                    trace!("response does not start with HTTP, assuming HTTP/0.9");
                    return Ok(Vec::new());
                }
                checked_prefix = len == 4;
            }

            let mut window = head.clone();
            window.extend_from_slice(fresh);
            let scan_from = head.len().saturating_sub(2);
            if let Some(end) = find_head_end(&window, scan_from) {
                self.consume(end - head.len(), Some(&mut head)).await?;
                return Ok(head);
            }

            if head.len() + n > MAX_HEAD_SIZE {
                return Err(ConnectError::TooLarge {
                    what: "response head",
                    limit: MAX_HEAD_SIZE,
                });
            }
            self.consume(n, Some(&mut head)).await?;
        }
    }

    /// Whether an idle connection still looks usable.
    ///
    /// An idle keep-alive connection should have nothing to read; if it is
    /// readable the server either closed it or sent something unexpected.
    pub async fn is_idle_alive(&mut self) -> bool {
        match self.transport.poll_readable(Duration::ZERO).await {
            Ok(readable) => !readable,
            Err(_) => false,
        }
    }

    /// Shuts the connection down. Errors are logged and ignored.
    pub async fn close(mut self) {
        if let Err(e) = self.transport.close().await {
            trace!(peer = %self.peer, error = %e, "error closing connection");
        }
    }
}

/// Finds the end of a head in `buf`: the index just past `\n\n` or
/// `\n\r\n`, scanning from `from`.
fn find_head_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some(i + 2),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some(i + 3),
                _ => {}
            }
        }
        i += 1;
    }
    None
}
